//! A small cooperative cancellation token, playing the role of Go's
//! `context.Context` cancellation half without pulling in `tokio-util` for a
//! single type.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::watch;

/// A child token links to its parent by value, not by a spawned task: the
/// parent chain is walked on every `is_cancelled`/`cancelled` call instead of
/// being observed by a permanently-parked background task. Deriving a child
/// is then just allocating a `watch::channel` plus a `Box`, not a `tokio::spawn`
/// that lives as long as the parent.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    tx: watch::Sender<bool>,
    parent: Option<Box<CancellationToken>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx, parent: None }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow() || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    /// Resolves once `cancel` has been called on this token or any of its
    /// ancestors (possibly already, before this call). Safe to await
    /// concurrently from multiple tasks. Boxed because it recurses into the
    /// parent's own `cancelled()` when there is one.
    pub fn cancelled(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if self.is_cancelled() {
                return;
            }
            let mut rx = self.tx.subscribe();
            match &self.parent {
                None => {
                    let _ = rx.wait_for(|v| *v).await;
                }
                Some(parent) => {
                    tokio::select! {
                        _ = rx.wait_for(|v| *v) => {}
                        () = parent.cancelled() => {}
                    }
                }
            }
        })
    }

    /// A token that is a cancellation-only view of this one: cancelling the
    /// child has no effect on the parent, but the child observes the
    /// parent's cancellation too. Used to derive per-command timeouts from
    /// the service-stop token while keeping their own, earlier, deadline.
    pub fn child(&self) -> CancellationToken {
        let (tx, _) = watch::channel(false);
        CancellationToken {
            tx,
            parent: Some(Box::new(self.clone())),
        }
    }
}
