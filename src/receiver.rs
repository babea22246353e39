//! Receiver Pipeline (spec §4.3).
//!
//! One long-running task pulls envelopes from the transport, demuxes by
//! kind, runs the receive-side module chain, and routes survivors either
//! to the correlator (command responses) or to a per-kind bounded ready
//! queue the application drains via `Channel::receive_*`.
//!
//! The task only exists once the session reaches `established`
//! (spec §4.3 "Start condition"); before that, `receive_session` reads
//! directly off the transport under a mutex (spec §4.3 "Session receive
//! special case").

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::correlator::Correlator;
use crate::envelope::{Command, Envelope, EnvelopeKind, Message, Notification, Reason, Session};
use crate::error::{ChannelError, Result, TimeoutKind};
use crate::module::ModuleChain;
use crate::modules::{CloseRequester, CloseTrigger};
use crate::transport::Transport;

/// `envelope_buffer_size <= 0` is treated as this large-but-finite
/// capacity: `consume_timeout` bounds any stall regardless, so a literal
/// unbounded channel buys nothing a sufficiently large one doesn't.
const UNBOUNDED_APPROXIMATION: usize = 1 << 20;

struct ReadyQueue {
    tx: mpsc::Sender<Envelope>,
    rx: Mutex<mpsc::Receiver<Envelope>>,
    capacity: usize,
    depth: AtomicUsize,
}

impl ReadyQueue {
    fn new(capacity: usize) -> Self {
        let bound = if capacity == 0 {
            UNBOUNDED_APPROXIMATION
        } else {
            capacity
        };
        let (tx, rx) = mpsc::channel(bound);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity: bound,
            depth: AtomicUsize::new(0),
        }
    }

    fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

pub struct Receiver {
    transport: Arc<dyn Transport>,
    modules: ModuleChain,
    correlator: Arc<Correlator>,
    closer: Arc<dyn CloseRequester>,
    consume_timeout: Duration,

    messages: ReadyQueue,
    notifications: ReadyQueue,
    commands: ReadyQueue,
    sessions: ReadyQueue,

    /// Guards direct-from-transport session reads before `established`
    /// (spec §4.3: "only one caller at a time").
    direct_session_read: Mutex<()>,
    reader: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    read_cancel: CancellationToken,
}

impl Receiver {
    pub fn new(
        transport: Arc<dyn Transport>,
        modules: ModuleChain,
        correlator: Arc<Correlator>,
        closer: Arc<dyn CloseRequester>,
        envelope_buffer_size: usize,
        consume_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            modules,
            correlator,
            closer,
            consume_timeout,
            messages: ReadyQueue::new(envelope_buffer_size),
            notifications: ReadyQueue::new(envelope_buffer_size),
            commands: ReadyQueue::new(envelope_buffer_size),
            sessions: ReadyQueue::new(envelope_buffer_size),
            direct_session_read: Mutex::new(()),
            reader: std::sync::Mutex::new(None),
            read_cancel: CancellationToken::new(),
        })
    }

    /// Starts the demux loop. Called once, when the session reaches
    /// `established` (spec §4.3, §4.5).
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.reader.lock().unwrap();
        if guard.is_some() {
            return; // already running
        }
        let this = Arc::clone(self);
        *guard = Some(tokio::spawn(async move { this.run().await }));
    }

    async fn run(self: Arc<Self>) {
        loop {
            let envelope = match self
                .transport
                .receive(&self.read_cancel)
                .await
            {
                Ok(Some(envelope)) => envelope,
                Ok(None) => {
                    debug!("receiver: transport EOF, requesting close");
                    self.closer.request_close(CloseTrigger::Other, None).await;
                    return;
                }
                Err(ChannelError::Canceled) => return,
                Err(err) => {
                    error!(%err, "receiver: transport error, closing channel");
                    self.closer
                        .request_close(CloseTrigger::Consumer, Some(Reason::new(1, err.to_string())))
                        .await;
                    return;
                }
            };

            if let Err(err) = self.process(envelope).await {
                error!(%err, "receiver: unrecoverable error processing envelope, closing channel");
                self.closer
                    .request_close(CloseTrigger::Consumer, Some(Reason::new(1, err.to_string())))
                    .await;
                return;
            }
        }
    }

    async fn process(&self, envelope: Envelope) -> Result<()> {
        let kind = envelope.kind();
        let envelope = match self.modules.run_receive(envelope).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return Ok(()), // dropped by a module
            Err(err) => return Err(err),
        };

        if kind == EnvelopeKind::Command {
            if let Some(command) = envelope.as_command() {
                if self.correlator.try_submit_command_result(command.clone()) {
                    return Ok(()); // consumed as a response, never reaches the app
                }
            }
        }

        let queue = self.queue_for(kind);
        match tokio::time::timeout(self.consume_timeout, queue.tx.send(envelope)).await {
            Ok(Ok(())) => {
                queue.depth.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Ok(Err(_)) => Err(ChannelError::Closed),
            Err(_) => Err(ChannelError::Timeout(TimeoutKind::Consume {
                queue_depths: self.queue_depths(),
            })),
        }
    }

    fn queue_for(&self, kind: EnvelopeKind) -> &ReadyQueue {
        match kind {
            EnvelopeKind::Message => &self.messages,
            EnvelopeKind::Notification => &self.notifications,
            EnvelopeKind::Command => &self.commands,
            EnvelopeKind::Session => &self.sessions,
        }
    }

    fn queue_depths(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("message", self.messages.depth()),
            ("notification", self.notifications.depth()),
            ("command", self.commands.depth()),
            ("session", self.sessions.depth()),
        ]
    }

    async fn receive_from(&self, queue: &ReadyQueue, cancel: &CancellationToken) -> Result<Envelope> {
        let mut rx = queue.rx.lock().await;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ChannelError::Canceled),
            envelope = rx.recv() => {
                let envelope = envelope.ok_or(ChannelError::Closed)?;
                queue.depth.fetch_sub(1, Ordering::SeqCst);
                Ok(envelope)
            }
        }
    }

    pub async fn receive_message(&self, cancel: &CancellationToken) -> Result<Message> {
        match self.receive_from(&self.messages, cancel).await? {
            Envelope::Message(m) => Ok(m),
            _ => unreachable!("message ready queue only ever holds Message envelopes"),
        }
    }

    pub async fn receive_notification(&self, cancel: &CancellationToken) -> Result<Notification> {
        match self.receive_from(&self.notifications, cancel).await? {
            Envelope::Notification(n) => Ok(n),
            _ => unreachable!("notification ready queue only ever holds Notification envelopes"),
        }
    }

    pub async fn receive_command(&self, cancel: &CancellationToken) -> Result<Command> {
        match self.receive_from(&self.commands, cancel).await? {
            Envelope::Command(c) => Ok(c),
            _ => unreachable!("command ready queue only ever holds Command envelopes"),
        }
    }

    /// Post-`established` session receive, through the ordinary demux
    /// path (spec §4.3).
    pub async fn receive_session(&self, cancel: &CancellationToken) -> Result<Session> {
        match self.receive_from(&self.sessions, cancel).await? {
            Envelope::Session(s) => Ok(s),
            _ => unreachable!("session ready queue only ever holds Session envelopes"),
        }
    }

    /// Pre-`established` session receive, direct from the transport
    /// (spec §4.3 "Session receive special case").
    pub async fn receive_session_direct(&self, cancel: &CancellationToken) -> Result<Session> {
        let _guard = self.direct_session_read.lock().await;
        loop {
            match self.transport.receive(cancel).await? {
                Some(envelope) => {
                    let kind = envelope.kind();
                    match self.modules.run_receive(envelope).await? {
                        Some(Envelope::Session(session)) => return Ok(session),
                        Some(_) => {
                            warn!(?kind, "receiver: non-session envelope before established, dropping");
                            continue;
                        }
                        None => continue, // dropped by a module
                    }
                }
                None => return Err(ChannelError::Closed),
            }
        }
    }

    /// Stops the demux loop, bounded by `stop_timeout` (spec §4.6 step 1).
    pub async fn shutdown(&self, stop_timeout: Duration) {
        self.read_cancel.cancel();
        let handle = self.reader.lock().unwrap().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(stop_timeout, handle).await.is_err() {
                warn!("receiver demux loop did not stop within the stop timeout");
            }
        }
    }
}
