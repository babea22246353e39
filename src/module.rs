//! Per-envelope-type interceptor chain (spec §4.7, §5 DESIGN NOTES).
//!
//! A module may replace or drop an envelope on send/receive, and is
//! notified of session-state transitions. Registries are snapshotted
//! (copy-on-read) before each dispatch so that registration during
//! iteration is safe but only affects the next envelope (spec §5
//! "Shared resources").

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::envelope::{Envelope, EnvelopeKind, SessionState};
use crate::error::Result;

/// An interceptor registered for one or more envelope kinds.
///
/// Returning `Ok(None)` from `on_send`/`on_receive` drops the envelope.
/// Raising an error routes to the sender/consumer exception handler and
/// aborts the pipeline (spec §4.3 step 3, §4.4 step 2). The open
/// question in spec §9 about in-place mutation is resolved here by
/// requiring the module's output to replace its input rather than
/// mutating through a shared reference.
#[async_trait]
pub trait Module: Send + Sync {
    /// Which envelope kinds this module intercepts.
    fn kinds(&self) -> &[EnvelopeKind];

    async fn on_send(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        Ok(Some(envelope))
    }

    async fn on_receive(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        Ok(Some(envelope))
    }

    /// Called when the channel's session state changes. Happens-before
    /// any subsequent envelope passes through this module (spec §5
    /// "Ordering guarantees").
    async fn on_state_changed(&self, _state: SessionState) {}
}

/// Registration order is preserve dispatch order (spec §4.3 step 3:
/// "registered receive-side modules in registration order").
#[derive(Default, Clone)]
pub struct ModuleChain {
    modules: Arc<Mutex<Vec<Arc<dyn Module>>>>,
}

impl ModuleChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, module: Arc<dyn Module>) {
        self.modules.lock().unwrap().push(module);
    }

    /// Copy-on-read snapshot of modules registered for `kind`, taken
    /// once at the start of dispatch.
    fn snapshot(&self, kind: EnvelopeKind) -> Vec<Arc<dyn Module>> {
        self.modules
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.kinds().contains(&kind))
            .cloned()
            .collect()
    }

    /// Runs the send-side chain for `envelope`'s kind. Returns `Ok(None)`
    /// if any module dropped it.
    pub async fn run_send(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        let kind = envelope.kind();
        let mut current = envelope;
        for module in self.snapshot(kind) {
            match module.on_send(current).await? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Runs the receive-side chain for `envelope`'s kind.
    pub async fn run_receive(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        let kind = envelope.kind();
        let mut current = envelope;
        for module in self.snapshot(kind) {
            match module.on_receive(current).await? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Broadcasts a session-state change to every registered module, in
    /// registration order (spec §4.5 "state changes are broadcast").
    pub async fn notify_state_changed(&self, state: SessionState) {
        let snapshot: Vec<Arc<dyn Module>> = self.modules.lock().unwrap().clone();
        for module in snapshot {
            module.on_state_changed(state).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Message, NotificationEvent};
    use crate::envelope::Notification;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModule {
        kinds: Vec<EnvelopeKind>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Module for CountingModule {
        fn kinds(&self) -> &[EnvelopeKind] {
            &self.kinds
        }

        async fn on_send(&self, envelope: Envelope) -> Result<Option<Envelope>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(envelope))
        }
    }

    struct DroppingModule;

    #[async_trait]
    impl Module for DroppingModule {
        fn kinds(&self) -> &[EnvelopeKind] {
            &[EnvelopeKind::Message]
        }

        async fn on_send(&self, _: Envelope) -> Result<Option<Envelope>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn modules_only_run_for_their_kind() {
        let chain = ModuleChain::new();
        let calls = Arc::new(AtomicUsize::new(0));
        chain.register(Arc::new(CountingModule {
            kinds: vec![EnvelopeKind::Message],
            calls: Arc::clone(&calls),
        }));

        let msg = Envelope::Message(Message::new(serde_json::json!(null)));
        chain.run_send(msg).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let notif = Envelope::Notification(Notification::new(NotificationEvent::Accepted));
        chain.run_send(notif).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1, "notification must not hit the message-only module");
    }

    #[tokio::test]
    async fn dropping_module_removes_envelope() {
        let chain = ModuleChain::new();
        chain.register(Arc::new(DroppingModule));
        let msg = Envelope::Message(Message::new(serde_json::json!(null)));
        assert!(chain.run_send(msg).await.unwrap().is_none());
    }
}
