//! Handler module - message dispatch by type code.
//!
//! Contains the handler registry (type code -> callback table) and the
//! channel context handed to every invoked handler. Both the master and
//! worker roles build one registry at startup and share the dispatch path.

mod context;
mod registry;

pub use context::ChannelContext;
pub use registry::{BoxFuture, FnHandler, Handler, HandlerRegistry, HandlerResult};
