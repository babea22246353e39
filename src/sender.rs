//! Sender Pipeline (spec §4.4).
//!
//! Every call validates session state, runs the send-side module chain,
//! then hands the survivor to a single background batcher task — the one
//! writer to the transport (spec §4.4 "Serialization"). `send_batch_size
//! = 1` makes the batcher flush immediately, which is functionally
//! equivalent to no batching at all.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, instrument, warn};

use crate::envelope::{Envelope, EnvelopeKind, Reason, SessionState};
use crate::error::{ChannelError, Result, TimeoutKind};
use crate::module::ModuleChain;
use crate::modules::{CloseRequester, CloseTrigger, OutboundSink};
use crate::session_state::allows_ordinary_envelopes;
use crate::transport::Transport;

struct QueueItem {
    envelope: Envelope,
    completion: oneshot::Sender<Result<()>>,
}

pub struct Sender {
    queue_tx: mpsc::Sender<QueueItem>,
    modules: ModuleChain,
    closer: Arc<dyn CloseRequester>,
    state: watch::Receiver<SessionState>,
    worker: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl Sender {
    pub fn new(
        transport: Arc<dyn Transport>,
        modules: ModuleChain,
        closer: Arc<dyn CloseRequester>,
        state: watch::Receiver<SessionState>,
        send_timeout: Duration,
        batch_size: usize,
        flush_interval: Duration,
    ) -> Arc<Self> {
        let batch_size = batch_size.max(1);
        let (queue_tx, queue_rx) = mpsc::channel(batch_size.max(16));
        let shutdown = CancellationToken::new();

        let worker = tokio::spawn(batcher_loop(
            transport,
            queue_rx,
            batch_size,
            flush_interval,
            send_timeout,
            shutdown.clone(),
            Arc::clone(&closer),
        ));

        Arc::new(Self {
            queue_tx,
            modules,
            closer,
            state,
            worker: std::sync::Mutex::new(Some(worker)),
            shutdown,
        })
    }

    fn validate_state(&self, kind: EnvelopeKind) -> Result<()> {
        let state = *self.state.borrow();
        if state.is_terminal() {
            return Err(ChannelError::Closed);
        }
        if kind != EnvelopeKind::Session && !allows_ordinary_envelopes(state) {
            return Err(ChannelError::InvalidState(format!(
                "cannot send {} while session state is {state:?}",
                kind.as_str()
            )));
        }
        Ok(())
    }

    /// Validates state, runs the send-side module chain, and queues the
    /// survivor for the batcher. Used by the channel's public `Send*`
    /// operations.
    #[instrument(skip_all, fields(kind = ?envelope.kind()))]
    pub async fn send(&self, envelope: Envelope, cancel: &CancellationToken) -> Result<()> {
        self.validate_state(envelope.kind())?;
        let Some(envelope) = self.run_send_modules(envelope).await? else {
            return Ok(()); // dropped by a module
        };
        self.enqueue_checked(envelope, cancel).await
    }

    /// Runs the send-side module chain, routing a module error to the
    /// closing protocol before propagating it (spec §7: `ModuleError`
    /// triggers closing).
    async fn run_send_modules(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        match self.modules.run_send(envelope).await {
            Ok(result) => Ok(result),
            Err(err) => {
                error!(%err, "sender: module error, closing channel");
                self.closer
                    .request_close(CloseTrigger::Sender, Some(Reason::new(1, err.to_string())))
                    .await;
                Err(err)
            }
        }
    }

    /// Queues `envelope` directly, skipping the state check: used by
    /// built-in modules (ping auto-reply, remote-ping watchdog) that only
    /// ever run once the channel is established.
    async fn enqueue_checked(&self, envelope: Envelope, cancel: &CancellationToken) -> Result<()> {
        let (completion_tx, completion_rx) = oneshot::channel();
        let item = QueueItem {
            envelope,
            completion: completion_tx,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChannelError::Canceled),
            result = self.queue_tx.send(item) => {
                if result.is_err() {
                    return Err(ChannelError::Closed);
                }
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ChannelError::Canceled),
            result = completion_rx => result.unwrap_or(Err(ChannelError::Closed)),
        }
    }

    /// Stops accepting new input and awaits the batcher, bounded by
    /// `stop_timeout` (spec §4.6 step 1).
    pub async fn shutdown(&self, stop_timeout: Duration) {
        self.shutdown.cancel();
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(stop_timeout, handle).await.is_err() {
                warn!("sender batcher did not stop within the stop timeout");
            }
        }
    }
}

#[async_trait]
impl OutboundSink for Sender {
    async fn enqueue(&self, envelope: Envelope) -> Result<()> {
        let Some(envelope) = self.run_send_modules(envelope).await? else {
            return Ok(());
        };
        self.enqueue_checked(envelope, &CancellationToken::new()).await
    }
}

#[instrument(skip_all)]
async fn batcher_loop(
    transport: Arc<dyn Transport>,
    mut queue_rx: mpsc::Receiver<QueueItem>,
    batch_size: usize,
    flush_interval: Duration,
    send_timeout: Duration,
    shutdown: CancellationToken,
    closer: Arc<dyn CloseRequester>,
) {
    let mut batch: Vec<QueueItem> = Vec::with_capacity(batch_size);
    let mut batch_deadline: Option<tokio::time::Instant> = None;
    loop {
        let sleep = match batch_deadline {
            Some(deadline) => tokio::time::sleep_until(deadline),
            None => tokio::time::sleep(flush_interval), // never fires: batch is empty, guard below disables it
        };

        tokio::select! {
            biased;
            item = queue_rx.recv() => {
                match item {
                    Some(item) => {
                        if batch.is_empty() {
                            batch_deadline = Some(tokio::time::Instant::now() + flush_interval);
                        }
                        batch.push(item);
                        if batch.len() >= batch_size {
                            flush(&transport, &mut batch, send_timeout, &closer).await;
                            batch_deadline = None;
                        }
                    }
                    None => {
                        flush(&transport, &mut batch, send_timeout, &closer).await;
                        return;
                    }
                }
            }
            _ = sleep, if batch_deadline.is_some() => {
                flush(&transport, &mut batch, send_timeout, &closer).await;
                batch_deadline = None;
            }
            _ = shutdown.cancelled(), if batch_deadline.is_none() => {
                // Nothing buffered and nothing inbound: drain whatever is
                // already queued, then stop.
                while let Ok(item) = queue_rx.try_recv() {
                    batch.push(item);
                }
                flush(&transport, &mut batch, send_timeout, &closer).await;
                return;
            }
        }

        if shutdown.is_cancelled() && queue_rx.is_empty() {
            flush(&transport, &mut batch, send_timeout, &closer).await;
            return;
        }
    }
}

async fn flush(
    transport: &Arc<dyn Transport>,
    batch: &mut Vec<QueueItem>,
    send_timeout: Duration,
    closer: &Arc<dyn CloseRequester>,
) {
    if batch.is_empty() {
        return;
    }
    let cancel = CancellationToken::new();
    let mut failure: Option<String> = None;
    for item in batch.drain(..) {
        let result = match tokio::time::timeout(
            send_timeout,
            transport.send(item.envelope, &cancel),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!("transport send exceeded send_timeout");
                Err(ChannelError::Timeout(TimeoutKind::Send))
            }
        };
        if let Err(err) = &result {
            failure.get_or_insert_with(|| err.to_string());
        }
        let _ = item.completion.send(result);
    }
    if let Some(reason) = failure {
        closer
            .request_close(CloseTrigger::Sender, Some(Reason::new(1, reason)))
            .await;
    }
}
