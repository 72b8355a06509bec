//! Handler registry for dispatching messages by type code.
//!
//! The registry maps message-type codes to handlers. It is built once per
//! role (master or worker) before the event loop starts; dispatch is a pure
//! lookup-and-invoke. A completed message with no registered handler is
//! logged and discarded rather than failing the connection - unknown or
//! future message types must not break interoperability.
//!
//! # Example
//!
//! ```
//! use farmwire::handler::HandlerRegistry;
//! use farmwire::protocol::msg_type;
//!
//! let mut registry = HandlerRegistry::new();
//!
//! registry.register_fn(msg_type::BROADCAST, |_ctx, payload| async move {
//!     println!("broadcast of {} bytes", payload.len());
//!     Ok(())
//! });
//!
//! assert!(registry.has_handler(msg_type::BROADCAST));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use bytes::Bytes;

use super::ChannelContext;
use crate::error::Result;

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for message handlers.
pub trait Handler: Send + Sync + 'static {
    /// Handle a complete message delivered on a channel.
    fn call(&self, ctx: ChannelContext, payload: Bytes) -> BoxFuture<'static, HandlerResult>;
}

/// Wrapper turning an async closure into a [`Handler`].
pub struct FnHandler<F, Fut>
where
    F: Fn(ChannelContext, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(ChannelContext, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new handler from an async closure.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Handler for FnHandler<F, Fut>
where
    F: Fn(ChannelContext, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, ctx: ChannelContext, payload: Bytes) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(ctx, payload))
    }
}

/// Registry mapping message-type codes to handlers.
pub struct HandlerRegistry {
    handlers: HashMap<u16, Box<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a message-type code.
    ///
    /// Registering the same code twice replaces the earlier handler.
    pub fn register(&mut self, msg_type: u16, handler: Box<dyn Handler>) {
        self.handlers.insert(msg_type, handler);
    }

    /// Register an async closure for a message-type code.
    pub fn register_fn<F, Fut>(&mut self, msg_type: u16, handler: F)
    where
        F: Fn(ChannelContext, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(msg_type, Box::new(FnHandler::new(handler)));
    }

    /// Check whether a handler is registered for a code.
    pub fn has_handler(&self, msg_type: u16) -> bool {
        self.handlers.contains_key(&msg_type)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch a message to its handler.
    ///
    /// A missing entry is the discard path: the message is logged and
    /// dropped, and `Ok(())` is returned so the connection stays up.
    pub async fn dispatch(&self, msg_type: u16, ctx: ChannelContext, payload: Bytes) -> Result<()> {
        match self.handlers.get(&msg_type) {
            Some(handler) => handler.call(ctx, payload).await,
            None => {
                tracing::warn!(
                    msg_type,
                    payload_len = payload.len(),
                    "No handler registered, discarding message"
                );
                Ok(())
            }
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::msg_type;
    use crate::writer::spawn_writer_task;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::duplex;

    fn test_ctx() -> ChannelContext {
        let (client, _server) = duplex(4096);
        let (writer, _task) = spawn_writer_task(client, Arc::new(AtomicU64::new(0)));
        ChannelContext::new(1, writer)
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = HandlerRegistry::new();

        registry.register_fn(msg_type::RESULT, |_ctx, _payload| async { Ok(()) });

        assert!(registry.has_handler(msg_type::RESULT));
        assert!(!registry.has_handler(msg_type::WORK));
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_invokes_handler() {
        let mut registry = HandlerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_handler = hits.clone();

        registry.register_fn(msg_type::RESULT, move |_ctx, payload| {
            let hits = hits_in_handler.clone();
            async move {
                assert_eq!(&payload[..], b"data");
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        registry
            .dispatch(msg_type::RESULT, test_ctx(), Bytes::from_static(b"data"))
            .await
            .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_type_discards() {
        let registry = HandlerRegistry::new();

        // Unknown type must not be an error
        let result = registry
            .dispatch(0x0999, test_ctx(), Bytes::from_static(b"whatever"))
            .await;

        assert!(result.is_ok());
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = HandlerRegistry::new();

        registry.register_fn(msg_type::BROADCAST, |_ctx, _payload| async { Ok(()) });
        registry.register_fn(msg_type::BROADCAST, |_ctx, _payload| async { Ok(()) });

        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_app_defined_code_dispatch() {
        let mut registry = HandlerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_handler = hits.clone();

        let code = msg_type::APP_BASE + 3;
        registry.register_fn(code, move |_ctx, _payload| {
            let hits = hits_in_handler.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        registry
            .dispatch(code, test_ctx(), Bytes::new())
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
