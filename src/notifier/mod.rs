//! The Telegram notifier (spec §4.3–§4.5): `Base` (outbound queue + shutdown
//! signal + pending-sender wait-group) plus the receiver and sender loops
//! that turn it into a running worker. Grounded in the teacher's
//! `bot-utils::broadcasting::Broadcaster`/`sender_task` (separate "done"
//! signal rather than closing the multi-producer queue, §9) and
//! `bot-utils::updates::handle_updates` (receiver dispatch shape).

mod command_index;
pub mod receiver;
pub mod sender;

use std::sync::Arc;
use std::time::Duration;

use bot_utils::{CancellationToken, RateLimiter};
use tokio::sync::{mpsc, watch};

pub use command_index::CommandIndex;

use crate::bot_client::BotClient;
use crate::error::{Error, Result};
use crate::executor::ExecutorHandle;
use crate::ids::NotifierId;
use crate::notification::Notification;
use crate::router::NotifierHandle;

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub queue_capacity: usize,
    pub enqueue_timeout: Duration,
    pub command_semaphore: usize,
    pub command_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub shutdown_budget: Duration,
    pub pending_send_wait: Duration,
    pub rate: f64,
    pub burst: u32,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            enqueue_timeout: Duration::from_secs(5),
            command_semaphore: 100,
            command_timeout: Duration::from_secs(3),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            shutdown_budget: Duration::from_secs(60),
            pending_send_wait: Duration::from_secs(6),
            rate: 25.0,
            burst: 5,
        }
    }
}

pub(crate) type QueueEntry = (CancellationToken, Notification);

/// RAII increment/decrement of the pending-senders wait-group, so every exit
/// path out of `Base::send`/`try_send` — success, queue-full, cancellation —
/// leaves the counter correct.
struct PendingGuard<'a>(&'a watch::Sender<usize>);

impl<'a> PendingGuard<'a> {
    fn enter(pending: &'a watch::Sender<usize>) -> Self {
        pending.send_modify(|n| *n += 1);
        Self(pending)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n -= 1);
    }
}

/// The abstract notifier state (§4.3). `queue_tx` is never closed directly —
/// closing it would race with concurrent producers (§9) — only `done` is,
/// and `Base::close` is idempotent because `CancellationToken::cancel` is.
pub struct Base {
    id: NotifierId,
    queue_tx: mpsc::Sender<QueueEntry>,
    done: CancellationToken,
    pending: watch::Sender<usize>,
    enqueue_timeout: Duration,
}

impl Base {
    fn new(id: NotifierId, config: &NotifierConfig) -> (Self, mpsc::Receiver<QueueEntry>) {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let base = Self {
            id,
            queue_tx,
            done: CancellationToken::new(),
            pending: watch::Sender::new(0),
            enqueue_timeout: config.enqueue_timeout,
        };
        (base, queue_rx)
    }

    pub fn id(&self) -> &NotifierId {
        &self.id
    }

    async fn send_entry(&self, cancel: &CancellationToken, notification: Notification) -> Result<()> {
        let _guard = PendingGuard::enter(&self.pending);

        tokio::select! {
            biased;
            () = self.done.cancelled() => Err(Error::Canceled),
            () = cancel.cancelled() => Err(Error::Canceled),
            result = self.queue_tx.send((cancel.clone(), notification)) => {
                result.map_err(|_| Error::Canceled)
            }
            () = tokio::time::sleep(self.enqueue_timeout) => Err(Error::QueueFull),
        }
    }

    fn try_send_entry(&self, cancel: &CancellationToken, notification: Notification) -> Result<()> {
        if self.done.is_cancelled() {
            return Err(Error::Canceled);
        }
        self.queue_tx
            .try_send((cancel.clone(), notification))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Error::QueueFull,
                mpsc::error::TrySendError::Closed(_) => Error::Canceled,
            })
    }

    /// Idempotent: flips the closed-flag and fires `done`, waking the
    /// receiver so it cannot become a zombie (§9).
    pub fn close(&self) {
        self.done.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }

    pub async fn wait_for_pending_sends(&self, timeout: Duration) {
        let mut rx = self.pending.subscribe();
        let wait = rx.wait_for(|n| *n == 0);
        if tokio::time::timeout(timeout, wait).await.is_err() {
            log::warn!(
                "notifier {}: pending sends did not drain within {:?}",
                self.id,
                timeout
            );
        }
    }

    pub(crate) fn done_token(&self) -> CancellationToken {
        self.done.clone()
    }
}

impl NotifierHandle for Base {
    async fn send(&self, notification: Notification, cancel: &CancellationToken) -> Result<()> {
        self.send_entry(cancel, notification).await
    }

    fn try_send(&self, cancel: &CancellationToken, notification: Notification) -> Result<()> {
        self.try_send_entry(cancel, notification)
    }
}

/// Constructs a `Base` and spawns its receiver and sender loops, returning
/// the `Base` (to register with the router) and a join handle that resolves
/// once both loops have exited — mirroring the notifier lifecycle in §3
/// ("constructed → `Run` spawns receiver + sender → drain → return").
#[allow(clippy::too_many_arguments)]
pub fn spawn<C: BotClient, E: ExecutorHandle + 'static>(
    id: NotifierId,
    chat_id: i64,
    bot_client: C,
    executor: Arc<E>,
    command_index: Arc<CommandIndex>,
    config: NotifierConfig,
    service_stop: CancellationToken,
) -> (Arc<Base>, tokio::task::JoinHandle<()>) {
    let (base, queue_rx) = Base::new(id, &config);
    let base = Arc::new(base);
    let rate_limiter = Arc::new(RateLimiter::new(config.rate, config.burst));

    let join = tokio::spawn(run(
        Arc::clone(&base),
        queue_rx,
        bot_client,
        chat_id,
        executor,
        command_index,
        rate_limiter,
        config,
        service_stop,
    ));

    (base, join)
}

#[allow(clippy::too_many_arguments)]
async fn run<C: BotClient, E: ExecutorHandle + 'static>(
    base: Arc<Base>,
    queue_rx: mpsc::Receiver<QueueEntry>,
    bot_client: C,
    chat_id: i64,
    executor: Arc<E>,
    command_index: Arc<CommandIndex>,
    rate_limiter: Arc<RateLimiter>,
    config: NotifierConfig,
    service_stop: CancellationToken,
) {
    let receiver_handle = tokio::spawn(receiver::run(
        Arc::clone(&base),
        bot_client.clone(),
        chat_id,
        Arc::clone(&executor),
        Arc::clone(&command_index),
        config.clone(),
        service_stop.clone(),
    ));

    // The sender's own `tokio::spawn` is its outer panic boundary (§4.5's
    // "outer defer recover"): a panic surfaces as `Err(JoinError)` here
    // rather than unwinding into this task, and we react the same way the
    // teacher's equivalent recover would — close the notifier so the
    // receiver cannot become a silent zombie (§9).
    let sender_handle = tokio::spawn(sender::run(
        Arc::clone(&base),
        queue_rx,
        bot_client,
        chat_id,
        Arc::clone(&command_index),
        rate_limiter,
        config,
        service_stop,
    ));

    if let Err(panic) = sender_handle.await {
        log::error!("notifier {} sender task panicked: {panic:?}", base.id());
        base.close();
    }

    let _ = receiver_handle.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{TaskCommandId, TaskId};

    fn notification() -> Notification {
        Notification::new(TaskId::new("t"), TaskCommandId::new("c"), "hi")
    }

    #[tokio::test]
    async fn try_send_fails_with_queue_full_when_capacity_exhausted() {
        let config = NotifierConfig {
            queue_capacity: 1,
            ..Default::default()
        };
        let (base, _rx) = Base::new(NotifierId::new("main"), &config);
        let cancel = CancellationToken::new();

        base.try_send(&cancel, notification()).unwrap();
        let result = base.try_send(&cancel, notification());
        assert!(matches!(result, Err(Error::QueueFull)));
    }

    #[tokio::test]
    async fn try_send_fails_after_close() {
        let config = NotifierConfig::default();
        let (base, _rx) = Base::new(NotifierId::new("main"), &config);
        base.close();

        let cancel = CancellationToken::new();
        let result = base.try_send(&cancel, notification());
        assert!(matches!(result, Err(Error::Canceled)));
    }

    #[tokio::test]
    async fn send_fails_with_queue_full_on_enqueue_timeout() {
        let config = NotifierConfig {
            queue_capacity: 1,
            enqueue_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let (base, _rx) = Base::new(NotifierId::new("main"), &config);
        let cancel = CancellationToken::new();

        base.send(notification(), &cancel).await.unwrap();
        let result = base.send(notification(), &cancel).await;
        assert!(matches!(result, Err(Error::QueueFull)));
    }

    #[tokio::test]
    async fn wait_for_pending_sends_resolves_once_guard_drops() {
        let config = NotifierConfig::default();
        let (base, _rx) = Base::new(NotifierId::new("main"), &config);
        base.wait_for_pending_sends(Duration::from_millis(50)).await;
    }
}
