//! Command request/response correlation (spec §4.2).
//!
//! Grounded in the teacher pack's ZeroMQ DEALER/ROUTER request client
//! (`other_examples/8191e1c9_..._reqrep.rs.rs`): a `Mutex<HashMap<id, slot>>`
//! of single-shot completions, registered before the request is sent and
//! removed atomically on fulfillment, cancellation, or timeout.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::envelope::Command;
use crate::error::{ChannelError, Result};

/// A single-shot slot awaiting a command response. The first of
/// `{fulfilled, canceled}` wins (spec §4.2 "Concurrency").
type Slot = oneshot::Sender<Command>;

/// Maps pending request ids to awaiting response slots.
///
/// May be constructed once per channel or shared across channels when
/// the caller injects one (spec §3 "Ownership"); entries are always
/// keyed by request id, so sharing is safe as long as ids are unique
/// across the sharing channels.
#[derive(Default)]
pub struct Correlator {
    pending: std::sync::Mutex<HashMap<String, Slot>>,
}

impl Correlator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `request`'s id, returning a receiver that resolves when
    /// a matching response arrives, or an error if the id already has a
    /// pending slot.
    ///
    /// Preconditions (spec §4.2): `request.status = pending`,
    /// `request.method != observe`, `request.id` non-empty.
    fn register(&self, request: &Command) -> Result<oneshot::Receiver<Command>> {
        request.validate_as_request()?;
        let id = request.header.id.clone().expect("validated above");

        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().unwrap();
        if pending.contains_key(&id) {
            return Err(ChannelError::Duplicate(id));
        }
        pending.insert(id, tx);
        Ok(rx)
    }

    fn remove(&self, id: &str) -> Option<Slot> {
        self.pending.lock().unwrap().remove(id)
    }

    /// Registers `request`, sends it via `send_request`, then awaits the
    /// matching response or `cancel`. On cancellation the correlator
    /// entry is removed so a later-arriving response is silently
    /// dropped (spec §5 "Cancellation").
    pub async fn process_command<F, Fut>(
        &self,
        request: Command,
        cancel: &CancellationToken,
        send_request: F,
    ) -> Result<Command>
    where
        F: FnOnce(Command) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let rx = self.register(&request)?;
        let id = request.header.id.clone().expect("validated by register");

        if let Err(e) = send_request(request).await {
            self.remove(&id);
            return Err(e);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.remove(&id);
                trace!(id, "process_command canceled, correlator entry removed");
                Err(ChannelError::Canceled)
            }
            result = rx => {
                match result {
                    Ok(response) => {
                        debug!(id, "process_command resolved");
                        Ok(response)
                    }
                    Err(_) => Err(ChannelError::Canceled), // slot dropped by cancel_all
                }
            }
        }
    }

    /// Delivers an inbound response to its awaiting slot.
    ///
    /// Rejects responses where `id` is empty, `status = pending`, or
    /// `method = observe` (spec §4.2). Returns `true` iff a slot was
    /// found and fulfilled; a slot fulfilled twice (or one that no
    /// longer exists because of a prior cancellation) returns `false`.
    pub fn try_submit_command_result(&self, response: Command) -> bool {
        if response.validate_as_response().is_err() {
            return false;
        }
        let id = response.header.id.clone().expect("validated above");
        match self.remove(&id) {
            Some(slot) => slot.send(response).is_ok(),
            None => false,
        }
    }

    /// Cancels every outstanding slot and empties the table (spec §4.6
    /// step 2, run during the closing protocol).
    pub fn cancel_all(&self) {
        let mut pending = self.pending.lock().unwrap();
        let count = pending.len();
        if count > 0 {
            debug!(count, "canceling all pending commands");
        }
        // Dropping each sender without sending resolves the matching
        // receiver with an error, which `process_command` maps to `Canceled`.
        pending.clear();
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::CommandMethod;

    fn noop_send(_: Command) -> std::future::Ready<Result<()>> {
        std::future::ready(Ok(()))
    }

    #[tokio::test]
    async fn duplicate_id_rejected() {
        let correlator = Correlator::new();
        let request = Command::request(CommandMethod::Get, "/account").with_id("c2");
        let cancel = CancellationToken::new();

        let first = {
            let correlator = Arc::clone(&correlator);
            let request = request.clone();
            tokio::spawn(async move {
                correlator.process_command(request, &cancel, noop_send).await
            })
        };
        // Give the first registration a chance to land before the duplicate.
        tokio::task::yield_now().await;

        let err = correlator
            .process_command(request.clone(), &CancellationToken::new(), noop_send)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Duplicate(_)));

        let response = request.success_response(None);
        assert!(correlator.try_submit_command_result(response.clone()));
        let resolved = first.await.unwrap().unwrap();
        assert_eq!(resolved.header.id, response.header.id);
    }

    #[tokio::test]
    async fn observe_commands_bypass_correlation() {
        let correlator = Correlator::new();
        let observe = Command::request(CommandMethod::Observe, "/presence");
        let cancel = CancellationToken::new();
        let err = correlator
            .process_command(observe, &cancel, noop_send)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::InvalidArgument(_)));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn second_submission_for_same_id_returns_false() {
        let correlator = Correlator::new();
        let request = Command::request(CommandMethod::Get, "/account").with_id("c9");
        let cancel = CancellationToken::new();
        let handle = {
            let correlator = Arc::clone(&correlator);
            let request = request.clone();
            tokio::spawn(async move {
                correlator.process_command(request, &cancel, noop_send).await
            })
        };
        tokio::task::yield_now().await;

        let response = request.success_response(None);
        assert!(correlator.try_submit_command_result(response.clone()));
        assert!(!correlator.try_submit_command_result(response));
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancel_all_resolves_pending_as_canceled() {
        let correlator = Correlator::new();
        let request = Command::request(CommandMethod::Get, "/account").with_id("c10");
        let cancel = CancellationToken::new();
        let handle = {
            let correlator = Arc::clone(&correlator);
            let request = request.clone();
            tokio::spawn(async move {
                correlator.process_command(request, &cancel, noop_send).await
            })
        };
        tokio::task::yield_now().await;
        correlator.cancel_all();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ChannelError::Canceled));
    }
}
