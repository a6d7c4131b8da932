//! A single live task instance (spec §3 "Task instance (live)").

use std::time::Instant;

use bot_utils::CancellationToken;

use crate::ids::{NotifierId, TaskCommandId, TaskId, TaskInstanceId};
use crate::notification::RunBy;

#[derive(Debug, Clone)]
pub struct TaskInstance {
    pub instance_id: TaskInstanceId,
    pub task_id: TaskId,
    pub command_id: TaskCommandId,
    pub notifier_id: NotifierId,
    pub run_by: RunBy,
    pub started_at: Instant,
    cancel: CancellationToken,
}

impl TaskInstance {
    pub fn new(
        instance_id: TaskInstanceId,
        task_id: TaskId,
        command_id: TaskCommandId,
        notifier_id: NotifierId,
        run_by: RunBy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            instance_id,
            task_id,
            command_id,
            notifier_id,
            run_by,
            started_at: Instant::now(),
            cancel,
        }
    }

    /// Idempotent: cancelling an already-cancelled instance is well-defined
    /// (P9) since `CancellationToken::cancel` is itself idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}
