//! The data model shapes from spec §3: `Notification`, `BotCommand`,
//! `TaskSubmitRequest`, and the `RunBy` origin tag.

use std::time::Duration;

use crate::ids::{NotifierId, TaskCommandId, TaskId, TaskInstanceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RunBy {
    User,
    Scheduler,
    Unknown,
}

/// A message destined for one notifier's outbound queue. `message` is
/// HTML the caller opts into; it is never escaped by the pipeline. `title`,
/// if present, is escaped and truncated during enrichment.
#[derive(Debug, Clone)]
pub struct Notification {
    pub task_id: TaskId,
    pub command_id: TaskCommandId,
    pub instance_id: Option<TaskInstanceId>,
    pub title: Option<String>,
    pub message: String,
    pub elapsed: Option<Duration>,
    pub cancelable: bool,
    pub error_occurred: bool,
}

impl Notification {
    pub fn new(task_id: TaskId, command_id: TaskCommandId, message: impl Into<String>) -> Self {
        Self {
            task_id,
            command_id,
            instance_id: None,
            title: None,
            message: message.into(),
            elapsed: None,
            cancelable: false,
            error_occurred: false,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_instance(mut self, instance_id: TaskInstanceId) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn cancelable(mut self) -> Self {
        self.cancelable = true;
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        // a zero elapsed duration is equivalent to "omit" per the enrichment contract
        self.elapsed = if elapsed.is_zero() {
            None
        } else {
            Some(elapsed)
        };
        self
    }

    pub fn error(mut self) -> Self {
        self.error_occurred = true;
        self
    }
}

/// A registered slash-command, one per `(TaskId, CommandId)` pair usable
/// from a notifier, plus the synthetic `help` entry (empty ids).
#[derive(Debug, Clone)]
pub struct BotCommand {
    pub name: String,
    pub title: String,
    pub description: String,
    pub task_id: TaskId,
    pub command_id: TaskCommandId,
}

#[derive(Debug, Clone)]
pub struct TaskSubmitRequest {
    pub task_id: TaskId,
    pub command_id: TaskCommandId,
    pub notifier_id: NotifierId,
    pub notify_on_start: bool,
    pub run_by: RunBy,
    /// Whether the originating notifier can render HTML, forwarded verbatim
    /// into `Task::execute` (§4.10) so a task can choose plain-text output
    /// instead of relying solely on the transport-level fallback.
    pub supports_html: bool,
}
