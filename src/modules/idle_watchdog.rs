//! Remote-ping idle watchdog (spec §4.7).
//!
//! After the channel reaches `established`, schedules periodic ping
//! requests and tracks the time since the last received envelope of any
//! kind. If nothing arrives within `remote_idle_timeout`, requests the
//! channel close with reason `Idle`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::envelope::{Command, CommandMethod, Envelope, EnvelopeKind, Reason, SessionState};
use crate::error::Result;
use crate::module::Module;
use crate::modules::ping::OutboundSink;

const ALL_KINDS: [EnvelopeKind; 4] = [
    EnvelopeKind::Message,
    EnvelopeKind::Notification,
    EnvelopeKind::Command,
    EnvelopeKind::Session,
];

const IDLE_REASON_CODE: i32 = 69; // matches the LIME "session timeout" reason family

/// Which side of the pipeline triggered a close, so the channel can route
/// it to the right observable event (spec §6 "Observable events") and
/// record it under the right exception slot (spec §7 "Propagation policy").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseTrigger {
    /// A receive-side error: transport failure, consume timeout, or a
    /// receive-side module error. Raises `ConsumerException`.
    Consumer,
    /// A send-side error: send timeout, transport failure, or a send-side
    /// module error. Raises `SenderException`.
    Sender,
    /// Neither: an explicit close, a peer-initiated `closing` event, or a
    /// policy close (e.g. the idle watchdog). No exception event fires.
    Other,
}

/// Requests the owning channel close itself. Implemented by
/// [`crate::channel::Channel`]; kept as a trait so this module has no
/// direct dependency on the channel's full surface.
#[async_trait]
pub trait CloseRequester: Send + Sync {
    async fn request_close(&self, trigger: CloseTrigger, reason: Option<Reason>);
}

pub struct IdleWatchdogModule {
    sink: Arc<dyn OutboundSink>,
    closer: Arc<dyn CloseRequester>,
    ping_interval: Duration,
    idle_timeout: Duration,
    last_activity: Arc<std::sync::Mutex<Instant>>,
    running: Arc<AtomicBool>,
}

impl IdleWatchdogModule {
    pub fn new(
        sink: Arc<dyn OutboundSink>,
        closer: Arc<dyn CloseRequester>,
        ping_interval: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            sink,
            closer,
            ping_interval,
            idle_timeout,
            last_activity: Arc::new(std::sync::Mutex::new(Instant::now())),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    fn spawn(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return; // already watching (e.g. a re-sent `established`)
        }
        self.touch();

        let sink = Arc::clone(&self.sink);
        let closer = Arc::clone(&self.closer);
        let ping_interval = self.ping_interval;
        let idle_timeout = self.idle_timeout;
        let last_activity = Arc::clone(&self.last_activity);
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ping_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    return;
                }
                let idle_for = last_activity.lock().unwrap().elapsed();
                if idle_for >= idle_timeout {
                    warn!(?idle_for, "remote-ping watchdog: peer idle, closing channel");
                    closer
                        .request_close(
                            CloseTrigger::Other,
                            Some(Reason::new(IDLE_REASON_CODE, "idle timeout")),
                        )
                        .await;
                    return;
                }
                let ping = Command::request(CommandMethod::Get, "/ping");
                debug!(id = ?ping.header.id, "remote-ping watchdog: sending keepalive ping");
                if sink.enqueue(Envelope::Command(ping)).await.is_err() {
                    return; // channel already gone
                }
            }
        });
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Module for IdleWatchdogModule {
    fn kinds(&self) -> &[EnvelopeKind] {
        &ALL_KINDS
    }

    async fn on_receive(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        self.touch();
        Ok(Some(envelope))
    }

    async fn on_state_changed(&self, state: SessionState) {
        match state {
            SessionState::Established => self.spawn(),
            s if s.is_terminal() => self.stop(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingSink {
        sent: StdMutex<Vec<Envelope>>,
    }

    #[async_trait]
    impl OutboundSink for RecordingSink {
        async fn enqueue(&self, envelope: Envelope) -> Result<()> {
            self.sent.lock().unwrap().push(envelope);
            Ok(())
        }
    }

    struct RecordingCloser {
        notify: Notify,
        reason: StdMutex<Option<Reason>>,
    }

    impl Default for RecordingCloser {
        fn default() -> Self {
            Self {
                notify: Notify::new(),
                reason: StdMutex::new(None),
            }
        }
    }

    #[async_trait]
    impl CloseRequester for RecordingCloser {
        async fn request_close(&self, _trigger: CloseTrigger, reason: Option<Reason>) {
            *self.reason.lock().unwrap() = reason;
            self.notify.notify_one();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn closes_after_idle_timeout() {
        let sink = Arc::new(RecordingSink::default());
        let closer = Arc::new(RecordingCloser::default());
        let module = IdleWatchdogModule::new(
            Arc::clone(&sink) as Arc<dyn OutboundSink>,
            Arc::clone(&closer) as Arc<dyn CloseRequester>,
            Duration::from_millis(10),
            Duration::from_millis(50),
        );

        module.on_state_changed(SessionState::Established).await;
        closer.notify.notified().await;
        assert!(closer.reason.lock().unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn activity_resets_the_idle_timer() {
        let sink = Arc::new(RecordingSink::default());
        let closer = Arc::new(RecordingCloser::default());
        let module = IdleWatchdogModule::new(
            Arc::clone(&sink) as Arc<dyn OutboundSink>,
            Arc::clone(&closer) as Arc<dyn CloseRequester>,
            Duration::from_millis(10),
            Duration::from_millis(50),
        );

        module.on_state_changed(SessionState::Established).await;
        for _ in 0..8 {
            tokio::time::advance(Duration::from_millis(10)).await;
            module
                .on_receive(Envelope::Message(crate::envelope::Message::new(
                    serde_json::json!(null),
                )))
                .await
                .unwrap();
        }
        assert!(closer.reason.lock().unwrap().is_none());
        assert!(!sink.sent.lock().unwrap().is_empty(), "watchdog should still ping periodically");
    }
}
