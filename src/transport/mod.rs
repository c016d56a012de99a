//! The transport chain: a stack of composable filters, `{start, stop,
//! close, oneway, request, onCommand, onException}`, each forwarding to
//! a "next" link. The bottom link is the I/O pump over a byte endpoint;
//! the response correlator, inactivity monitor, and failover pool wrap
//! it from the bottom up.

pub mod byte_endpoint;
pub mod correlator;
pub mod dispatch;
pub mod failover;
pub mod inactivity_monitor;
pub mod io_pump;

use crate::command::Command;
use crate::error::CoreResult;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Upward callbacks a transport invokes on its listener. All four fire
/// on the reader task's thread and must never reenter the writer
/// synchronously with a `request` (`oneway` is fine).
pub trait TransportListener: Send + Sync {
    fn on_command(&self, command: Command);
    fn on_exception(&self, error: crate::error::CoreError);
    fn transport_interrupted(&self) {}
    fn transport_resumed(&self) {}
}

/// The upward API consumed by non-core layers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn start(&self) -> CoreResult<()>;
    async fn stop(&self) -> CoreResult<()>;
    async fn oneway(&self, command: Command) -> CoreResult<()>;
    async fn request(&self, command: Command, timeout: Option<Duration>) -> CoreResult<Command>;
    fn set_listener(&self, listener: Arc<dyn TransportListener>);
}
