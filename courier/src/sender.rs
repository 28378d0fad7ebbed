//! Outbound delivery worker pool (C6): pulls queued `MsgOut`s per channel,
//! respects per-channel concurrency and rate limits, retries transient
//! failures with backoff, and drains in-flight sends on shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::BackendError;
use crate::model::{MsgOut, Status, StatusUpdate};
use crate::ratelimit::LimiterRegistry;
use crate::registry::{Registry, SendContext};

/// Retry policy applied to a send that a handler reports as transient:
/// exponential backoff starting at `base`, doubling each attempt, capped at
/// `cap`, jittered +/-20% so many messages on the same channel don't retry
/// in lockstep, giving up after `max_retries`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            cap: Duration::from_secs(30 * 60),
            max_retries: 2,
        }
    }
}

impl RetryPolicy {
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.base.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped = exp.min(self.cap.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(-0.2..=0.2);
        let jittered = (capped * (1.0 + jitter)).max(0.0);
        Duration::from_secs_f64(jittered)
    }
}

/// A message queued for a retry after its delay elapses, channeled back
/// into the worker pool rather than held in a sleeping task per retry.
struct RetryTicket {
    channel_uuid: Uuid,
    msg: MsgOut,
    attempt: u32,
}

#[derive(Clone)]
pub struct SenderHandle {
    notify: Arc<tokio::sync::Notify>,
    queued_channels: Arc<dashmap::DashSet<Uuid>>,
}

impl SenderHandle {
    /// Tells the Sender a channel has new outbound work, avoiding a poll
    /// loop against every configured channel's outbox.
    pub fn notify_channel(&self, channel_uuid: Uuid) {
        self.queued_channels.insert(channel_uuid);
        self.notify.notify_waiters();
    }
}

pub struct Sender {
    backend: Arc<dyn Backend>,
    registry: Arc<Registry>,
    limiters: Arc<LimiterRegistry>,
    http: reqwest::Client,
    retry_policy: RetryPolicy,
    handle: SenderHandle,
    shutdown: CancellationToken,
}

impl Sender {
    pub fn new(
        backend: Arc<dyn Backend>,
        registry: Arc<Registry>,
        http: reqwest::Client,
        default_channel_concurrency: usize,
        default_channel_rate_per_second: u32,
        retry_policy: RetryPolicy,
        shutdown: CancellationToken,
    ) -> (Self, SenderHandle) {
        let handle = SenderHandle {
            notify: Arc::new(tokio::sync::Notify::new()),
            queued_channels: Arc::new(dashmap::DashSet::new()),
        };
        let sender = Self {
            backend,
            registry,
            limiters: Arc::new(LimiterRegistry::new(default_channel_concurrency, default_channel_rate_per_second)),
            http,
            retry_policy,
            handle: handle.clone(),
            shutdown,
        };
        (sender, handle)
    }

    pub fn handle(&self) -> SenderHandle {
        self.handle.clone()
    }

    /// Runs the worker pool until `shutdown` is cancelled, then drains
    /// in-flight retries before returning.
    pub async fn run(self, pool_size: usize) {
        let (tx, rx) = mpsc::channel::<RetryTicket>(1024);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let draining = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(pool_size);
        for worker_id in 0..pool_size {
            let backend = self.backend.clone();
            let registry = self.registry.clone();
            let limiters = self.limiters.clone();
            let http = self.http.clone();
            let retry_policy = self.retry_policy;
            let handle = self.handle.clone();
            let retry_tx = tx.clone();
            let rx = rx.clone();
            let shutdown = self.shutdown.clone();
            let draining = draining.clone();

            workers.push(tokio::spawn(async move {
                worker_loop(worker_id, backend, registry, limiters, http, retry_policy, handle, retry_tx, rx, shutdown, draining).await;
            }));
        }

        self.shutdown.cancelled().await;
        info!("sender shutting down, draining in-flight retries");
        draining.store(true, Ordering::SeqCst);
        drop(tx);

        for worker in workers {
            let _ = worker.await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: usize,
    backend: Arc<dyn Backend>,
    registry: Arc<Registry>,
    limiters: Arc<LimiterRegistry>,
    http: reqwest::Client,
    retry_policy: RetryPolicy,
    handle: SenderHandle,
    retry_tx: mpsc::Sender<RetryTicket>,
    retry_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<RetryTicket>>>,
    shutdown: CancellationToken,
    draining: Arc<AtomicBool>,
) {
    loop {
        if shutdown.is_cancelled() && draining.load(Ordering::SeqCst) {
            let mut rx = retry_rx.lock().await;
            match rx.try_recv() {
                Ok(ticket) => {
                    drop(rx);
                    process(&backend, &registry, &limiters, &http, retry_policy, &handle, &retry_tx, ticket).await;
                    continue;
                }
                Err(_) => return,
            }
        }

        let poll_channels: Vec<Uuid> = handle.queued_channels.iter().map(|e| *e).collect();
        let mut did_work = false;

        for channel_uuid in poll_channels {
            if let Ok(Some(msg)) = backend.pop_outgoing(channel_uuid).await {
                did_work = true;
                process(
                    &backend,
                    &registry,
                    &limiters,
                    &http,
                    retry_policy,
                    &handle,
                    &retry_tx,
                    RetryTicket { channel_uuid, msg, attempt: 0 },
                )
                .await;
            } else {
                handle.queued_channels.remove(&channel_uuid);
            }
        }

        if !did_work {
            let mut rx = retry_rx.lock().await;
            tokio::select! {
                ticket = rx.recv() => {
                    if let Some(ticket) = ticket {
                        drop(rx);
                        process(&backend, &registry, &limiters, &http, retry_policy, &handle, &retry_tx, ticket).await;
                    }
                }
                _ = handle.notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                _ = shutdown.cancelled(), if !draining.load(Ordering::SeqCst) => {}
            }
        }

        if worker_id == 0 {
            debug!("sender worker {worker_id} cycle complete");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process(
    backend: &Arc<dyn Backend>,
    registry: &Arc<Registry>,
    limiters: &Arc<LimiterRegistry>,
    http: &reqwest::Client,
    retry_policy: RetryPolicy,
    handle: &SenderHandle,
    retry_tx: &mpsc::Sender<RetryTicket>,
    ticket: RetryTicket,
) {
    let RetryTicket { channel_uuid, msg, attempt } = ticket;

    let channel = match backend.get_channel_by_uuid(channel_uuid).await {
        Ok(channel) => channel,
        Err(_) => {
            warn!(%channel_uuid, "channel vanished before send, dropping message");
            return;
        }
    };

    let Some(handler) = registry.get(&channel.channel_type) else {
        warn!(channel_type = %channel.channel_type, "no handler registered for channel type");
        return;
    };

    if let Ok(true) = backend.was_sent_recently(channel_uuid, msg.uuid).await {
        info!(%channel_uuid, msg_uuid = %msg.uuid, "message already wired, short-circuiting crash-recovery resend");
        let update = StatusUpdate::for_msg(msg.uuid, Status::Sent);
        let _ = backend.write_status_update(update).await;
        let _ = backend.mark_outgoing_handled(msg.uuid).await;
        return;
    }

    // A channel may declare its own concurrency/rate cap (e.g. WhatsApp
    // Cloud's 80 msg/s) via its config map; otherwise fall back to the
    // process-wide default per §4.6.
    let concurrency = channel
        .config_u64("max_concurrent_sends")
        .map(|v| v as usize)
        .unwrap_or_else(|| limiters.default_concurrency());
    let rate = channel
        .config_u64("rate_limit_per_second")
        .map(|v| v as u32)
        .unwrap_or_else(|| limiters.default_rate_per_second());
    let limiter = limiters.get_or_insert_with(channel_uuid, concurrency, rate);
    let _permit = limiter.concurrency.clone().acquire_owned().await;
    limiter.rate.until_ready().await;

    let mut log = crate::model::ChannelLog::new(channel_uuid, "send");
    let ctx = SendContext { channel: &channel, http };
    let outcome = handler.send(&ctx, &msg, &mut log).await;
    let _ = backend.write_channel_log(log).await;

    if outcome.is_success() {
        let update = StatusUpdate::for_msg(msg.uuid, Status::Wired);
        let update = match outcome.external_ids.first() {
            Some(id) => update.with_external_id(id.clone()),
            None => update,
        };
        let _ = backend.write_status_update(update).await;
        let _ = backend.mark_outgoing_handled(msg.uuid).await;
        return;
    }

    let error = outcome.errors.into_iter().next().expect("failure outcome carries an error");
    let retryable = error.is_retryable() && attempt < retry_policy.max_retries;

    if retryable {
        let delay = retry_policy.backoff_for(attempt);
        warn!(%channel_uuid, attempt, delay_secs = delay.as_secs(), error = %error, "send failed, scheduling retry");
        let retry_tx = retry_tx.clone();
        let handle = handle.clone();
        let backend = backend.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let ticket = RetryTicket { channel_uuid, msg: msg.clone(), attempt: attempt + 1 };
            if retry_tx.send(ticket).await.is_err() {
                let _ = backend.requeue_outgoing(msg).await;
            }
            handle.notify_channel(channel_uuid);
        });
        return;
    }

    let update = StatusUpdate::for_msg(msg.uuid, Status::Failed).with_error(error.to_string());
    if let Err(BackendError::Io(e)) = backend.write_status_update(update).await {
        warn!(error = %e, "failed to persist terminal status update");
    }
    let _ = backend.mark_outgoing_handled(msg.uuid).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        let first = policy.backoff_for(0);
        let second = policy.backoff_for(1);
        assert!(first.as_secs() <= 40 && first.as_secs() >= 20);
        assert!(second.as_secs() > first.as_secs() / 2);

        let far_future = policy.backoff_for(20);
        assert!(far_future <= policy.cap + policy.cap / 5);
    }
}
