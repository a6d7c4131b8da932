//! The receiver loop (spec §4.4): long-polls the bot client, filters by
//! chat, and dispatches each command behind a bounded semaphore. Grounded in
//! `bot_utils::updates::handle_updates`'s long-poll/dispatch shape, adapted
//! from per-chat mutex serialisation to a flat command-count semaphore
//! (there is exactly one chat per notifier here, so no chat-local ordering
//! is needed — every command already runs independently).

use std::sync::Arc;
use std::time::Duration;

use bot_utils::{CancellationToken, CommandParser};
use message_pipeline::html_escape;
use tokio::sync::Semaphore;

use super::{Base, CommandIndex, NotifierConfig};
use crate::bot_client::BotClient;
use crate::executor::ExecutorHandle;
use crate::ids::{TaskCommandId, TaskId, TaskInstanceId};
use crate::notification::{Notification, RunBy, TaskSubmitRequest};
use crate::router::NotifierHandle;

const LONG_POLL_TIMEOUT_SECS: u64 = 30;
const UPDATE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

fn help_reply(command_index: &CommandIndex) -> String {
    let mut text = "사용 가능한 명령어:".to_string();
    for command in command_index.listed_commands() {
        text.push_str("\n\n/");
        text.push_str(&command.name);
        text.push('\n');
        text.push_str(&command.description);
    }
    text
}

fn unknown_reply(raw_text: &str) -> String {
    format!("알 수 없는 명령어입니다: {}", html_escape(raw_text))
}

fn malformed_cancel_reply(raw_text: &str) -> String {
    format!(
        "올바른 형식이 아닙니다: {}",
        html_escape(raw_text)
    )
}

/// Enqueues `notification` best-effort; never blocks the caller.
fn try_notify(base: &Base, notification: Notification) {
    let cancel = CancellationToken::new();
    if let Err(e) = base.try_send(&cancel, notification) {
        log::warn!("notifier {}: failed to enqueue reply: {e}", base.id());
    }
}

fn bare_notification(message: impl Into<String>) -> Notification {
    Notification::new(TaskId::new(""), TaskCommandId::new(""), message)
}

pub(super) async fn run<C: BotClient, E: ExecutorHandle + 'static>(
    base: Arc<Base>,
    bot_client: C,
    chat_id: i64,
    executor: Arc<E>,
    command_index: Arc<CommandIndex>,
    config: NotifierConfig,
    service_stop: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(config.command_semaphore));
    let command_parser = CommandParser::new(None);
    let done = base.done_token();
    let mut offset: i64 = 0;

    loop {
        let updates = tokio::select! {
            biased;
            () = service_stop.cancelled() => return,
            () = done.cancelled() => return,
            result = bot_client.get_updates(offset, LONG_POLL_TIMEOUT_SECS) => result,
        };

        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => {
                log::error!("notifier {}: error retrieving updates: {e}", base.id());
                tokio::select! {
                    biased;
                    () = service_stop.cancelled() => return,
                    () = done.cancelled() => return,
                    () = tokio::time::sleep(UPDATE_ERROR_BACKOFF) => {}
                }
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);

            if update.chat_id != chat_id {
                continue;
            }
            let Some(text) = update.text else { continue };

            match Arc::clone(&semaphore).try_acquire_owned() {
                Ok(permit) => spawn_command(
                    permit,
                    Arc::clone(&base),
                    Arc::clone(&executor),
                    Arc::clone(&command_index),
                    command_parser.clone(),
                    service_stop.child(),
                    config.command_timeout,
                    text,
                ),
                Err(_) => {
                    log::warn!(
                        "notifier {}: command semaphore saturated, dropping update",
                        base.id()
                    );
                    try_notify(
                        &base,
                        bare_notification("시스템이 바쁩니다. 잠시 후 다시 시도해 주세요."),
                    );
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_command<E: ExecutorHandle + 'static>(
    permit: tokio::sync::OwnedSemaphorePermit,
    base: Arc<Base>,
    executor: Arc<E>,
    command_index: Arc<CommandIndex>,
    command_parser: CommandParser,
    cancel: CancellationToken,
    timeout: Duration,
    text: String,
) {
    let text_for_log = text.clone();

    let handle = tokio::spawn(async move {
        let _permit = permit;
        let body = handle_command(base, executor, command_index, command_parser, cancel, text);

        tokio::select! {
            biased;
            () = tokio::time::sleep(timeout) => {
                log::warn!("command handler timed out: {text_for_log:?}");
            }
            () = body => {}
        }
    });

    // The handler itself never propagates a panic beyond this supervisory
    // task (`tokio::spawn` is the panic boundary, as elsewhere in this
    // codebase) — logging here just surfaces it instead of letting it
    // vanish into tokio's default panic hook.
    let text_for_panic_log = text.clone();
    tokio::spawn(async move {
        if let Err(panic) = handle.await {
            log::error!("command handler panicked on {text_for_panic_log:?}: {panic:?}");
        }
    });
}

async fn handle_command<E: ExecutorHandle>(
    base: Arc<Base>,
    executor: Arc<E>,
    command_index: Arc<CommandIndex>,
    command_parser: CommandParser,
    cancel: CancellationToken,
    text: String,
) {
    let Some(parsed) = command_parser.parse(&text) else {
        reply(&base, &cancel, unknown_reply(&text)).await;
        return;
    };

    let command = parsed.command.to_ascii_lowercase();

    if command == "help" {
        reply(&base, &cancel, help_reply(&command_index)).await;
        return;
    }

    if let Some(rest) = command.strip_prefix("cancel_") {
        if rest.is_empty() {
            reply(&base, &cancel, malformed_cancel_reply(&text)).await;
        } else {
            handle_cancel(&base, &cancel, &executor, rest).await;
        }
        return;
    }
    if command == "cancel" {
        reply(&base, &cancel, malformed_cancel_reply(&text)).await;
        return;
    }

    match command_index.by_name(&command) {
        Some(bot_command) => {
            submit_task(
                &base,
                &cancel,
                &executor,
                bot_command.task_id.clone(),
                bot_command.command_id.clone(),
            )
            .await;
        }
        None => reply(&base, &cancel, unknown_reply(&text)).await,
    }
}

async fn reply(base: &Base, cancel: &CancellationToken, message: String) {
    if let Err(e) = base.send(bare_notification(message), cancel).await {
        log::warn!("notifier {}: failed to send reply: {e}", base.id());
    }
}

async fn handle_cancel<E: ExecutorHandle>(
    base: &Base,
    cancel: &CancellationToken,
    executor: &Arc<E>,
    instance_id: &str,
) {
    if let Err(e) = executor.cancel(&TaskInstanceId::new(instance_id)) {
        try_notify(
            base,
            bare_notification(format!("작업 {instance_id}을(를) 취소하지 못했습니다: {e}")),
        );
    }
    let _ = cancel;
}

async fn submit_task<E: ExecutorHandle>(
    base: &Base,
    _cancel: &CancellationToken,
    executor: &Arc<E>,
    task_id: TaskId,
    command_id: TaskCommandId,
) {
    let request = TaskSubmitRequest {
        task_id,
        command_id,
        notifier_id: base.id().clone(),
        notify_on_start: true,
        run_by: RunBy::User,
        // every notifier in this runtime is Telegram-backed, which always
        // renders HTML; a non-Telegram notifier would thread its own value
        // through here.
        supports_html: true,
    };

    if let Err(e) = executor.submit(request).await {
        try_notify(
            base,
            bare_notification(format!("제출에 실패했습니다 (시스템 과부하): {e}")),
        );
    }
}
