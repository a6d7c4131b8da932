//! The task executor (spec §4.9/§4.10): submits, runs, tracks and cancels
//! task instances, enforces the singleton policy, persists snapshots, and
//! routes resulting notifications back through the router.

mod instance;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use bot_utils::CancellationToken;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

pub use instance::TaskInstance;

use crate::error::{Error, Result};
use crate::ids::{NotifierId, TaskCommandId, TaskId, TaskInstanceId};
use crate::notification::{Notification, RunBy, TaskSubmitRequest};
use crate::router::NotificationRouter;
use crate::snapshot::SnapshotStore;

/// The failure a `Task::execute` reports back; carried verbatim into the
/// user-visible notification (`ExecutionFailed`, spec §7).
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ExecutionError(pub String);

pub struct TaskOutcome {
    pub message: String,
    pub new_snapshot: Option<serde_json::Value>,
}

impl TaskOutcome {
    pub fn silent() -> Self {
        Self {
            message: String::new(),
            new_snapshot: None,
        }
    }

    pub fn report(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            new_snapshot: None,
        }
    }

    pub fn report_with_snapshot(message: impl Into<String>, snapshot: serde_json::Value) -> Self {
        Self {
            message: message.into(),
            new_snapshot: Some(snapshot),
        }
    }
}

/// One running command invocation. Must honour `cancel` for every outbound
/// wait (§4.10: "must honour ctx for all outbound I/O") and be deterministic
/// given the same `prev_snapshot` and external responses.
pub trait Task: Send + Sync {
    fn execute(
        &self,
        prev_snapshot: Option<serde_json::Value>,
        supports_html: bool,
        cancel: CancellationToken,
    ) -> impl Future<Output = std::result::Result<TaskOutcome, ExecutionError>> + Send;
}

type BoxedTask = Box<dyn TaskObj>;

/// Object-safe wrapper so the registry can hold `Task` implementors of
/// different concrete types behind one factory signature.
trait TaskObj: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        prev_snapshot: Option<serde_json::Value>,
        supports_html: bool,
        cancel: CancellationToken,
    ) -> std::pin::Pin<
        Box<dyn Future<Output = std::result::Result<TaskOutcome, ExecutionError>> + Send + 'a>,
    >;
}

impl<T: Task> TaskObj for T {
    fn execute_boxed<'a>(
        &'a self,
        prev_snapshot: Option<serde_json::Value>,
        supports_html: bool,
        cancel: CancellationToken,
    ) -> std::pin::Pin<
        Box<dyn Future<Output = std::result::Result<TaskOutcome, ExecutionError>> + Send + 'a>,
    > {
        Box::pin(self.execute(prev_snapshot, supports_html, cancel))
    }
}

/// One command a task exposes: whether concurrent instances are allowed,
/// and the empty-snapshot marker used when no prior snapshot exists yet.
pub struct CommandConfig {
    pub id: TaskCommandId,
    pub title: String,
    pub description: String,
    pub allow_multiple: bool,
}

pub struct TaskConfig {
    pub id: TaskId,
    pub commands: Vec<CommandConfig>,
    pub new_task: Box<
        dyn Fn(&TaskInstanceId, &TaskSubmitRequest) -> Box<dyn Task> + Send + Sync,
    >,
}

#[derive(Default)]
pub struct Registry {
    tasks: HashMap<TaskId, TaskConfig>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task, returning `InvalidInput` if its id is already taken
    /// or any of its commands duplicate another task's registered name
    /// (names are `snake_case(TaskId) + "_" + snake_case(CommandID)`,
    /// uniqueness enforced where the bot command index is built, per §3's
    /// `BotCommand` invariant).
    pub fn register(&mut self, config: TaskConfig) -> Result<()> {
        if self.tasks.contains_key(&config.id) {
            return Err(Error::InvalidInput(format!(
                "task {} already registered",
                config.id
            )));
        }
        self.tasks.insert(config.id.clone(), config);
        Ok(())
    }

    fn command(&self, task_id: &TaskId, command_id: &TaskCommandId) -> Result<&CommandConfig> {
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| Error::InvalidInput(format!("unknown task {task_id}")))?;

        task.commands
            .iter()
            .find(|cmd| &cmd.id == command_id)
            .ok_or_else(|| Error::InvalidInput(format!("unknown command {task_id}/{command_id}")))
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskConfig> {
        self.tasks.values()
    }
}

fn generate_instance_id() -> TaskInstanceId {
    let suffix: u64 = rand::rng().random();
    TaskInstanceId::new(format!("{suffix:016x}"))
}

pub struct Executor<S: SnapshotStore> {
    registry: Registry,
    storage: Arc<S>,
    router: Arc<NotificationRouter>,
    live: StdMutex<HashMap<TaskInstanceId, TaskInstance>>,
    root_cancel: CancellationToken,
    join_set: Mutex<JoinSet<()>>,
    /// Lets `&self` methods spawn work that needs an owned, strong
    /// reference to the executor, without forcing every caller to hold an
    /// `Arc<Executor<S>>` just to call `submit`/`cancel`.
    self_ref: std::sync::Weak<Self>,
}

impl<S: SnapshotStore + 'static> Executor<S> {
    pub fn new(registry: Registry, storage: Arc<S>, router: Arc<NotificationRouter>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            registry,
            storage,
            router,
            live: StdMutex::new(HashMap::new()),
            root_cancel: CancellationToken::new(),
            join_set: Mutex::new(JoinSet::new()),
            self_ref: self_ref.clone(),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Checks the singleton policy and reserves `instance`'s slot under one
    /// `live` lock guard (P7): the count check and the insert happen inside
    /// the same critical section, with no `.await` between them, so two
    /// concurrent submits of the same non-`allow_multiple` command can't
    /// both observe zero and both insert.
    fn reserve_slot(
        &self,
        task_id: &TaskId,
        command_id: &TaskCommandId,
        allow_multiple: bool,
        instance: TaskInstance,
    ) -> Result<()> {
        let mut live = self.live.lock().unwrap();
        if !allow_multiple
            && live
                .values()
                .any(|i| &i.task_id == task_id && &i.command_id == command_id)
        {
            return Err(Error::AlreadyRunning(format!("{task_id}/{command_id}")));
        }
        live.insert(instance.instance_id.clone(), instance);
        Ok(())
    }

    pub async fn submit(&self, req: TaskSubmitRequest) -> Result<TaskInstanceId> {
        let command = self.registry.command(&req.task_id, &req.command_id)?;
        let allow_multiple = command.allow_multiple;

        // Both are available before the snapshot load, so the slot can be
        // reserved before awaiting anything.
        let instance_id = generate_instance_id();
        let cancel = self.root_cancel.child();
        let instance = TaskInstance::new(
            instance_id.clone(),
            req.task_id.clone(),
            req.command_id.clone(),
            req.notifier_id.clone(),
            req.run_by,
            cancel.clone(),
        );

        self.reserve_slot(&req.task_id, &req.command_id, allow_multiple, instance)?;

        let prev_snapshot = match self.storage.load(&req.task_id, &req.command_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.live.lock().unwrap().remove(&instance_id);
                return Err(Error::ExecutionFailed(e.to_string()));
            }
        };

        let task_config = self
            .registry
            .tasks
            .get(&req.task_id)
            .expect("presence checked by `command` lookup above");
        let task = (task_config.new_task)(&instance_id, &req);

        let executor = self
            .self_ref
            .upgrade()
            .expect("executor outlives any call to submit on it");
        let notify_on_start = req.notify_on_start;
        let supports_html = req.supports_html;
        let task_id = req.task_id.clone();
        let command_id = req.command_id.clone();
        let notifier_id = req.notifier_id.clone();
        let run_instance_id = instance_id.clone();

        self.join_set.lock().await.spawn(async move {
            executor
                .run_instance(
                    run_instance_id,
                    task_id,
                    command_id,
                    notifier_id,
                    notify_on_start,
                    task,
                    prev_snapshot,
                    supports_html,
                    cancel,
                )
                .await
        });

        Ok(instance_id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_instance(
        self: Arc<Self>,
        instance_id: TaskInstanceId,
        task_id: TaskId,
        command_id: TaskCommandId,
        notifier_id: NotifierId,
        notify_on_start: bool,
        task: BoxedTask,
        prev_snapshot: Option<serde_json::Value>,
        supports_html: bool,
        cancel: CancellationToken,
    ) {
        if notify_on_start {
            let started = Notification::new(task_id.clone(), command_id.clone(), "시작됨")
                .with_instance(instance_id.clone())
                .cancelable();
            self.try_notify(&notifier_id, started);
        }

        let started_at = std::time::Instant::now();

        // `tokio::spawn` itself is the panic boundary: a panicking task
        // surfaces as `Err(JoinError)` here rather than unwinding into us.
        let outcome = match tokio::spawn(async move {
            task.execute_boxed(prev_snapshot, supports_html, cancel).await
        })
        .await
        {
            Ok(result) => result,
            Err(panic) => {
                log::error!("task {task_id}/{command_id} panicked: {panic:?}");
                Err(ExecutionError("internal error".to_string()))
            }
        };

        match outcome {
            Err(e) => {
                let notification =
                    Notification::new(task_id.clone(), command_id.clone(), e.0).error();
                self.try_notify(&notifier_id, notification);
            }
            Ok(TaskOutcome {
                message,
                new_snapshot,
            }) if !message.is_empty() => {
                if let Some(snapshot) = new_snapshot {
                    if let Err(e) = self.storage.save(&task_id, &command_id, snapshot).await {
                        log::error!("failed to persist snapshot for {task_id}/{command_id}: {e}");
                    }
                }
                let notification =
                    Notification::new(task_id.clone(), command_id.clone(), message)
                        .with_elapsed(started_at.elapsed());
                self.try_notify(&notifier_id, notification);
            }
            Ok(TaskOutcome { new_snapshot, .. }) => {
                // `("", Some(snap), ...)` is forbidden by the task contract (§4.10);
                // the executor enforces it defensively rather than trusting the task.
                if new_snapshot.is_some() {
                    log::warn!(
                        "task {task_id}/{command_id} returned a snapshot with an empty message; discarding it"
                    );
                }
            }
        }

        self.live.lock().unwrap().remove(&instance_id);
    }

    fn try_notify(&self, notifier_id: &NotifierId, notification: Notification) {
        if let Err(e) = self.router.try_route(notifier_id, notification) {
            log::warn!("failed to route notification to {notifier_id}: {e}");
        }
    }

    pub fn cancel(&self, instance_id: &TaskInstanceId) -> Result<()> {
        let live = self.live.lock().unwrap();
        let instance = live
            .get(instance_id)
            .ok_or_else(|| Error::NotFound(format!("task instance {instance_id}")))?;
        instance.cancel();
        Ok(())
    }

    pub fn is_live(&self, instance_id: &TaskInstanceId) -> bool {
        self.live.lock().unwrap().contains_key(instance_id)
    }

    /// Cancels `root_cancel` (propagating to every live instance's child
    /// token), cancels each explicitly for good measure, then waits for all
    /// spawned instance tasks to finish, bounded by `timeout`.
    pub async fn shutdown(&self, timeout: Duration) {
        self.root_cancel.cancel();

        for instance in self.live.lock().unwrap().values() {
            instance.cancel();
        }

        let mut join_set = self.join_set.lock().await;
        let wait_all = async {
            while join_set.join_next().await.is_some() {}
        };

        if tokio::time::timeout(timeout, wait_all).await.is_err() {
            log::warn!(
                "executor shutdown budget exceeded with {} instance(s) still live",
                self.live.lock().unwrap().len()
            );
        }
    }
}

/// Type-erased executor handle so the notifier module can submit/cancel
/// tasks without being generic over `S: SnapshotStore` (mirrors the
/// `DynNotifierHandle` shim in `router.rs`).
pub trait ExecutorHandle: Send + Sync {
    fn submit<'a>(
        &'a self,
        req: TaskSubmitRequest,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<TaskInstanceId>> + Send + 'a>>;

    fn cancel(&self, instance_id: &TaskInstanceId) -> Result<()>;
}

impl<S: SnapshotStore + 'static> ExecutorHandle for Executor<S> {
    fn submit<'a>(
        &'a self,
        req: TaskSubmitRequest,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<TaskInstanceId>> + Send + 'a>> {
        Box::pin(Executor::submit(self, req))
    }

    fn cancel(&self, instance_id: &TaskInstanceId) -> Result<()> {
        Executor::cancel(self, instance_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{InMemorySnapshotStore, SnapshotError};

    /// Wraps [`InMemorySnapshotStore`] with an artificial delay on `load`,
    /// widening the window a broken singleton check would race in.
    struct SlowSnapshotStore {
        inner: InMemorySnapshotStore,
        delay: Duration,
    }

    impl SlowSnapshotStore {
        fn new(delay: Duration) -> Self {
            Self {
                inner: InMemorySnapshotStore::new(),
                delay,
            }
        }
    }

    impl SnapshotStore for SlowSnapshotStore {
        async fn load(
            &self,
            task_id: &TaskId,
            command_id: &TaskCommandId,
        ) -> std::result::Result<Option<serde_json::Value>, SnapshotError> {
            tokio::time::sleep(self.delay).await;
            self.inner.load(task_id, command_id).await
        }

        async fn save(
            &self,
            task_id: &TaskId,
            command_id: &TaskCommandId,
            value: serde_json::Value,
        ) -> std::result::Result<(), SnapshotError> {
            self.inner.save(task_id, command_id, value).await
        }
    }

    struct Echo(String);

    impl Task for Echo {
        async fn execute(
            &self,
            _prev_snapshot: Option<serde_json::Value>,
            _supports_html: bool,
            _cancel: CancellationToken,
        ) -> std::result::Result<TaskOutcome, ExecutionError> {
            Ok(TaskOutcome::report(self.0.clone()))
        }
    }

    struct Blocking;

    impl Task for Blocking {
        async fn execute(
            &self,
            _prev_snapshot: Option<serde_json::Value>,
            _supports_html: bool,
            cancel: CancellationToken,
        ) -> std::result::Result<TaskOutcome, ExecutionError> {
            cancel.cancelled().await;
            Ok(TaskOutcome::report("canceled"))
        }
    }

    fn registry_with_echo(allow_multiple: bool) -> Registry {
        let mut registry = Registry::new();
        registry
            .register(TaskConfig {
                id: TaskId::new("greet"),
                commands: vec![CommandConfig {
                    id: TaskCommandId::new("hello"),
                    title: "Hello".to_string(),
                    description: "says hello".to_string(),
                    allow_multiple,
                }],
                new_task: Box::new(|_instance_id, _req| Box::new(Echo("hi".to_string()))),
            })
            .unwrap();
        registry
    }

    fn submit_request(task_id: &str, command_id: &str) -> TaskSubmitRequest {
        TaskSubmitRequest {
            task_id: TaskId::new(task_id),
            command_id: TaskCommandId::new(command_id),
            notifier_id: NotifierId::new("main"),
            notify_on_start: false,
            run_by: RunBy::User,
            supports_html: true,
        }
    }

    #[tokio::test]
    async fn unknown_task_is_invalid_input() {
        let executor = Executor::new(
            Registry::new(),
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(NotificationRouter::new()),
        );

        let result = executor.submit(submit_request("missing", "cmd")).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn singleton_command_rejects_concurrent_submission() {
        let router = NotificationRouter::new();
        struct Sink;
        impl crate::router::NotifierHandle for Sink {
            async fn send(&self, _n: Notification, _c: &CancellationToken) -> Result<()> {
                Ok(())
            }
            fn try_send(&self, _c: &CancellationToken, _n: Notification) -> Result<()> {
                Ok(())
            }
        }
        router.register(NotifierId::new("main"), Arc::new(Sink));

        let mut registry = Registry::new();
        registry
            .register(TaskConfig {
                id: TaskId::new("greet"),
                commands: vec![CommandConfig {
                    id: TaskCommandId::new("hello"),
                    title: "Hello".to_string(),
                    description: "blocks until canceled".to_string(),
                    allow_multiple: false,
                }],
                new_task: Box::new(|_instance_id, _req| Box::new(Blocking)),
            })
            .unwrap();

        let executor = Executor::new(
            registry,
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(router),
        );

        executor.submit(submit_request("greet", "hello")).await.unwrap();
        let second = executor.submit(submit_request("greet", "hello")).await;
        assert!(matches!(second, Err(Error::AlreadyRunning(_))));

        executor.shutdown(Duration::from_secs(1)).await;
    }

    /// P7 regression: two `submit` calls racing for the same singleton
    /// command must not both be admitted, even though the snapshot load
    /// they each await is slow enough to straddle both calls.
    #[tokio::test]
    async fn concurrent_submits_of_a_singleton_command_admit_only_one() {
        let registry = registry_with_echo(false);
        let executor = Executor::new(
            registry,
            Arc::new(SlowSnapshotStore::new(Duration::from_millis(20))),
            Arc::new(NotificationRouter::new()),
        );

        let (first, second) = tokio::join!(
            executor.submit(submit_request("greet", "hello")),
            executor.submit(submit_request("greet", "hello")),
        );
        let results = [first, second];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(Error::AlreadyRunning(_))))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let registry = registry_with_echo(true);
        let executor = Executor::new(
            registry,
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(NotificationRouter::new()),
        );

        let instance_id = executor.submit(submit_request("greet", "hello")).await.unwrap();
        // The instance may already have finished (Echo completes immediately);
        // either way cancelling twice must not panic (P9).
        let _ = executor.cancel(&instance_id);
        let _ = executor.cancel(&instance_id);
    }

    #[tokio::test]
    async fn cancel_unknown_instance_is_not_found() {
        let executor = Executor::new(
            Registry::new(),
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(NotificationRouter::new()),
        );
        let result = executor.cancel(&TaskInstanceId::new("nope"));
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
