//! The transport contract the channel core consumes (spec §4.1).
//!
//! Concrete transports (TCP, TLS, WebSocket, pipe) are external
//! collaborators, out of scope for this core (spec §1). The only
//! implementation shipped here is [`memory::MemoryTransport`], an
//! in-memory loopback pair used by the crate's own tests.

pub mod memory;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::envelope::Envelope;
use crate::error::Result;

/// A deferral registered on the `closing` event: the transport awaits
/// every returned future (bounded, spec §4.6) before it finishes tearing
/// down its socket.
pub type ClosingDeferral = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Invoked when the transport begins closing, before it tears down its
/// socket. May return a deferral the transport must await.
pub type ClosingHandler = Arc<dyn Fn() -> ClosingDeferral + Send + Sync>;

/// Invoked once, after the transport has finished tearing down.
pub type ClosedHandler = Arc<dyn Fn() + Send + Sync>;

/// Duplex envelope I/O consumed by the channel core (spec §4.1).
///
/// Methods take `&self`, not `&mut self`: a transport is shared between
/// the sender and receiver pipelines (one `Arc<dyn Transport>` each), so
/// it owns whatever interior mutability its read and write halves need.
/// Invariant kept by the core, not by the transport: it never issues
/// overlapping `send` calls, nor overlapping `receive` calls, on the same
/// instance — at most one of each is ever in flight. `send` and `receive`
/// themselves may run concurrently with each other, as on any full-duplex
/// socket.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to `uri`. Fails with a transport-specific error on I/O or
    /// protocol failure. Out-of-scope transports consume this; the
    /// channel core itself is handed an already-open transport and never
    /// calls `open` (spec §4.5 takes `transport`, not a URI).
    async fn open(&self, uri: &str) -> Result<()>;

    /// Block until one envelope is framed, or until `cancel` fires.
    /// Returns `Ok(None)` only on graceful peer EOF.
    async fn receive(&self, cancel: &CancellationToken) -> Result<Option<Envelope>>;

    /// Block until `envelope` is handed to the wire, or until `cancel` fires.
    async fn send(&self, envelope: Envelope, cancel: &CancellationToken) -> Result<()>;

    /// Initiate orderly shutdown. Idempotent: a second call is a no-op
    /// that returns `Ok(())` once the first completes.
    async fn close(&self) -> Result<()>;

    /// Observable connectedness flag.
    fn is_connected(&self) -> bool;

    /// Register a handler invoked when closing begins (spec §4.6),
    /// whether triggered by an explicit `close()` call or by the peer.
    fn on_closing(&self, handler: ClosingHandler);

    /// Register a handler invoked once teardown has completed.
    fn on_closed(&self, handler: ClosedHandler);
}
