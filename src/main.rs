//! Bootstrap binary: thin CLI wiring the core together. Registers one
//! demonstration task so the server is runnable; no real domain task logic
//! lives here (that's explicitly out of scope — see SPEC_FULL.md).

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use bot_utils::CancellationToken;
use clap::Parser;

use notifier_core::bot_client::FrankensteinBotClient;
use notifier_core::config::{self, AppConfig};
use notifier_core::executor::{
    CommandConfig, ExecutionError, Executor, Registry, Task, TaskConfig, TaskOutcome,
};
use notifier_core::ids::{NotifierId, TaskCommandId, TaskId};
use notifier_core::notification::BotCommand;
use notifier_core::notifier::{self, CommandIndex, NotifierConfig};
use notifier_core::router::NotificationRouter;
use notifier_core::snapshot::RedisSnapshotStore;

const SHUTDOWN_BUDGET: Duration = Duration::from_secs(20);

/// Notification and task-dispatch server.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the JSON config file (§6 `AppConfig`)
    #[arg(short, long, value_name = "PATH", env = "CONFIG_PATH")]
    config: std::path::PathBuf,

    /// URL of the Redis instance backing snapshot storage
    #[arg(short, long, value_name = "URL", env = "REDIS_URL", default_value = "redis://127.0.0.1")]
    redis_url: String,

    /// increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// disable logging
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn init_logging(args: &Args) {
    let log_level = match (args.quiet, args.verbose) {
        (true, _) => log::LevelFilter::Off,
        (_, 0) => log::LevelFilter::Error,
        (_, 1) => log::LevelFilter::Warn,
        (_, 2) => log::LevelFilter::Info,
        (_, 3) => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();
}

/// Echoes back that it ran; stands in for whatever real task bodies a
/// deployment registers through [`Registry`].
struct DemoTask {
    command_name: String,
}

impl Task for DemoTask {
    async fn execute(
        &self,
        _prev_snapshot: Option<serde_json::Value>,
        supports_html: bool,
        cancel: CancellationToken,
    ) -> Result<TaskOutcome, ExecutionError> {
        let done = if supports_html {
            format!("<b>{}</b> 작업 완료", self.command_name)
        } else {
            format!("{} 작업 완료", self.command_name)
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => Ok(TaskOutcome::report("취소되었습니다")),
            () = tokio::time::sleep(Duration::from_millis(200)) => {
                Ok(TaskOutcome::report(done))
            }
        }
    }
}

fn build_registry(app_config: &AppConfig) -> Registry {
    let mut registry = Registry::new();
    for task in &app_config.tasks {
        let task_id = TaskId::new(task.id.clone());
        let commands = task
            .commands
            .iter()
            .map(|cmd| CommandConfig {
                id: TaskCommandId::new(cmd.id.clone()),
                title: cmd.title.clone(),
                description: cmd.description.clone(),
                allow_multiple: false,
            })
            .collect();

        let task_title = task.title.clone();
        registry
            .register(TaskConfig {
                id: task_id.clone(),
                commands,
                new_task: Box::new(move |_instance_id, req| {
                    Box::new(DemoTask {
                        command_name: format!("{task_title}/{}", req.command_id),
                    })
                }),
            })
            .expect("config declares each TaskID at most once");
    }
    registry
}

fn build_command_index(app_config: &AppConfig) -> notifier_core::Result<CommandIndex> {
    let mut commands = Vec::new();
    for task in &app_config.tasks {
        let task_id = TaskId::new(task.id.clone());
        for cmd in &task.commands {
            if !cmd.notifier.usable {
                continue;
            }
            let command_id = TaskCommandId::new(cmd.id.clone());
            commands.push(BotCommand {
                name: config::bot_command_name(&task_id, &command_id),
                title: cmd.title.clone(),
                description: cmd.description.clone(),
                task_id: task_id.clone(),
                command_id,
            });
        }
    }
    CommandIndex::build(commands)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    let app_config = match config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("failed to load config from {}: {e}", args.config.display());
            return ExitCode::FAILURE;
        }
    };

    let command_index = match build_command_index(&app_config) {
        Ok(index) => Arc::new(index),
        Err(e) => {
            log::error!("invalid command configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // this will actually not establish a connection, and will also not fail,
    // since `redis_url` is only parsed into a `ConnectionInfo` here
    let redis_client = redis::Client::open(args.redis_url.as_str())
        .expect("redis URL already validated by `redis::Client::open`'s own parsing");
    let storage = Arc::new(RedisSnapshotStore::new(redis_client));

    let router = Arc::new(NotificationRouter::new());
    let registry = build_registry(&app_config);
    let executor = Executor::new(registry, storage, Arc::clone(&router));

    let service_stop = CancellationToken::new();
    let mut notifier_handles = Vec::new();

    for telegram in &app_config.notifier.telegrams {
        let notifier_id = NotifierId::new(telegram.id.clone());
        let bot_client = FrankensteinBotClient::new(&telegram.bot_token, telegram.chat_id);

        let (base, join) = notifier::spawn(
            notifier_id.clone(),
            telegram.chat_id,
            bot_client,
            Arc::clone(&executor),
            Arc::clone(&command_index),
            NotifierConfig {
                max_retries: app_config.http_retry.max_retries.max(1),
                retry_delay: app_config.http_retry.retry_delay(),
                ..NotifierConfig::default()
            },
            service_stop.clone(),
        );

        router.register(notifier_id, base);
        notifier_handles.push(join);
    }

    tokio::signal::ctrl_c()
        .await
        .expect("unable to listen for shutdown signal");

    log::info!("shutting down ...");
    service_stop.cancel();

    let wait_notifiers = async {
        for handle in notifier_handles {
            let _ = handle.await;
        }
    };

    let success = tokio::select! {
        () = wait_notifiers => true,
        _ = tokio::signal::ctrl_c() => false,
        () = tokio::time::sleep(SHUTDOWN_BUDGET) => false,
    };

    if !success {
        log::warn!("not all notifiers drained in time, shutting down anyway");
    }

    executor.shutdown(SHUTDOWN_BUDGET).await;

    ExitCode::SUCCESS
}
