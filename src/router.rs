//! The notification router (spec §4.11): hands a notification to the
//! matching notifier without the caller needing to know about transport
//! internals — the same decoupling purpose the teacher's generic `Backend`
//! trait in `bot-utils::broadcasting` serves on a different axis.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bot_utils::CancellationToken;

use crate::error::{Error, Result};
use crate::ids::NotifierId;
use crate::notification::Notification;

/// Exposes only what the router needs from a notifier: enqueueing a
/// notification, blocking or best-effort. Mirrors `Notifier.Send`/`TrySend`
/// (§6) — the enqueue timeout itself is the notifier's own concern.
pub trait NotifierHandle: Send + Sync {
    fn send(
        &self,
        notification: Notification,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<()>> + Send;

    fn try_send(&self, cancel: &CancellationToken, notification: Notification) -> Result<()>;
}

/// Type-erased handle so the router can hold a heterogeneous set of
/// notifiers behind one map.
pub trait DynNotifierHandle: Send + Sync {
    fn dyn_send<'a>(
        &'a self,
        notification: Notification,
        cancel: &'a CancellationToken,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn dyn_try_send(&self, cancel: &CancellationToken, notification: Notification) -> Result<()>;
}

impl<T: NotifierHandle> DynNotifierHandle for T {
    fn dyn_send<'a>(
        &'a self,
        notification: Notification,
        cancel: &'a CancellationToken,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.send(notification, cancel))
    }

    fn dyn_try_send(&self, cancel: &CancellationToken, notification: Notification) -> Result<()> {
        self.try_send(cancel, notification)
    }
}

/// Registration happens behind `&self` (not `&mut self`): the executor holds
/// an `Arc<NotificationRouter>` from construction onward, and notifiers are
/// only built afterward (they need an `Arc<Executor>` to submit/cancel into),
/// so the router must accept new entries while already shared.
#[derive(Default)]
pub struct NotificationRouter {
    notifiers: Mutex<HashMap<NotifierId, Arc<dyn DynNotifierHandle>>>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, notifier_id: NotifierId, handle: Arc<dyn DynNotifierHandle>) {
        self.notifiers.lock().unwrap().insert(notifier_id, handle);
    }

    fn get(&self, target: &NotifierId) -> Result<Arc<dyn DynNotifierHandle>> {
        self.notifiers
            .lock()
            .unwrap()
            .get(target)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("unknown notifier {target}")))
    }

    pub async fn route(
        &self,
        target: &NotifierId,
        notification: Notification,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.get(target)?.dyn_send(notification, cancel).await
    }

    /// Non-blocking; used for backpressure/best-effort replies (§4.4, §4.9).
    pub fn try_route(&self, target: &NotifierId, notification: Notification) -> Result<()> {
        self.get(target)?
            .dyn_try_send(&CancellationToken::new(), notification)
    }
}
