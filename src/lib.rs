//! # farmwire
//!
//! Master-coordinated work farming over a length-prefixed TCP message
//! protocol.
//!
//! A master process accepts connections from many worker processes, hands
//! out discrete units of computation, collects results asynchronously and
//! tracks aggregate throughput. Work units and results are opaque byte
//! buffers; their meaning belongs to the application on both ends.
//!
//! ## Architecture
//!
//! - **Wire protocol**: 8-byte header (magic, type, length) followed by the
//!   payload; messages survive arbitrary fragmentation on the stream.
//! - **Master**: admission by version-key handshake, FIFO dispatch to idle
//!   workers, redispatch of units held by dead workers (at-least-once).
//! - **Worker**: a thin client that computes units through an
//!   application-supplied callback.
//!
//! ## Example
//!
//! ```ignore
//! use farmwire::Master;
//!
//! #[tokio::main]
//! async fn main() -> farmwire::Result<()> {
//!     let master = Master::builder()
//!         .version_key(7)
//!         .on_result(|seq, bytes| println!("unit {} done ({} bytes)", seq, bytes.len()))
//!         .bind("0.0.0.0:1982")
//!         .await?;
//!
//!     master.begin()?;
//!     master.push(b"unit".to_vec())?;
//!     master.end()?;
//!     master.wait().await?;
//!     master.shutdown();
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod handler;
pub mod handshake;
pub mod master;
pub mod protocol;
pub mod queue;
pub mod worker_client;
pub mod workers;
pub mod writer;

pub use error::{FarmwireError, Result};
pub use master::{FarmState, FarmStats, Master, MasterBuilder, WorkerStats};
pub use worker_client::{WorkerClient, WorkerClientBuilder};
