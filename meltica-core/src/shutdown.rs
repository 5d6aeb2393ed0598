//! Traits for components that participate in graceful shutdown.
//!
//! Mirrors the shutdown pattern the rest of the gateway uses: cancelling the bus context
//! closes the bus and, transitively, every subscriber; cancelling a provider's context closes
//! its event and error channels, which the dispatcher observes as a closed input stream.

use std::future::Future;

/// Components that can shut down immediately, without awaiting anything.
pub trait SyncShutdown {
    type Result;
    fn shutdown(&mut self) -> Self::Result;
}

/// Components that need to await cleanup work (flush a channel, close a socket) on shutdown.
pub trait AsyncShutdown {
    type Result;
    fn shutdown(&mut self) -> impl Future<Output = Self::Result> + Send;
}
