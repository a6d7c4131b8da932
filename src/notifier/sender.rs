//! The sender loop (spec §4.5 main loop + drain procedure, §4.7 chunked
//! send, §4.8 retry/fallback state machine). The retry/backoff shape is
//! grounded in the teacher's `ScheduledMessage::handle_response` (decode
//! `frankenstein::Error::Api` into fatal/retryable branches); reworked here
//! into the spec's `retryAfter`-or-configured-delay rule and HTML/plaintext
//! fallback, since this notifier has no chat-migration concept.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bot_utils::{CancellationToken, RateLimiter};
use message_pipeline::{CHUNK_LIMIT, EnrichInput, chunk_message, enrich};
use tokio::sync::mpsc;

use super::{Base, CommandIndex, NotifierConfig, QueueEntry};
use crate::bot_client::{BotClient, ParseMode, SendError, SendMessage};
use crate::notification::Notification;

#[allow(clippy::too_many_arguments)]
pub(super) async fn run<C: BotClient>(
    base: Arc<Base>,
    mut queue_rx: mpsc::Receiver<QueueEntry>,
    bot_client: C,
    chat_id: i64,
    command_index: Arc<CommandIndex>,
    rate_limiter: Arc<RateLimiter>,
    config: NotifierConfig,
    service_stop: CancellationToken,
) {
    let done = base.done_token();

    loop {
        let entry = tokio::select! {
            biased;
            () = service_stop.cancelled() => break,
            () = done.cancelled() => break,
            entry = queue_rx.recv() => match entry {
                Some(entry) => entry,
                None => break,
            },
        };

        process_entry(&bot_client, chat_id, &command_index, &rate_limiter, &config, entry).await;
    }

    drain(
        &base,
        &mut queue_rx,
        &bot_client,
        chat_id,
        &command_index,
        &rate_limiter,
        &config,
    )
    .await;
}

/// Bounded graceful shutdown (§4.5). Waits briefly for in-flight `Send`
/// enqueues to land, then non-blockingly drains whatever is left, each
/// entry processed against a fresh deadline (not the already-cancelled
/// service context) so outbound calls during drain still succeed.
#[allow(clippy::too_many_arguments)]
async fn drain<C: BotClient>(
    base: &Base,
    queue_rx: &mut mpsc::Receiver<QueueEntry>,
    bot_client: &C,
    chat_id: i64,
    command_index: &CommandIndex,
    rate_limiter: &RateLimiter,
    config: &NotifierConfig,
) {
    base.wait_for_pending_sends(config.pending_send_wait).await;

    let drain_cancel = CancellationToken::new();
    {
        let drain_cancel = drain_cancel.clone();
        let budget = config.shutdown_budget;
        tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            drain_cancel.cancel();
        });
    }

    let mut residual = 0usize;
    loop {
        if drain_cancel.is_cancelled() {
            while queue_rx.try_recv().is_ok() {
                residual += 1;
            }
            break;
        }

        match queue_rx.try_recv() {
            Ok((_entry_cancel, notification)) => {
                process_entry(
                    bot_client,
                    chat_id,
                    command_index,
                    rate_limiter,
                    config,
                    (drain_cancel.clone(), notification),
                )
                .await;
            }
            Err(_) => break,
        }
    }

    if residual > 0 {
        log::warn!(
            "notifier {}: shutdown budget exceeded with {residual} notification(s) undelivered",
            base.id()
        );
    }
}

async fn process_entry<C: BotClient>(
    bot_client: &C,
    chat_id: i64,
    command_index: &CommandIndex,
    rate_limiter: &RateLimiter,
    config: &NotifierConfig,
    (cancel, notification): QueueEntry,
) {
    let text = render(notification, command_index);
    send_message(bot_client, chat_id, rate_limiter, config, &cancel, &text).await;
}

fn render(notification: Notification, command_index: &CommandIndex) -> String {
    let title = notification.title.or_else(|| {
        command_index
            .title_for(&notification.task_id, &notification.command_id)
            .map(str::to_string)
    });

    enrich(EnrichInput {
        title,
        body: notification.message,
        cancelable: notification.cancelable,
        instance_id: notification.instance_id.map(|id| id.to_string()),
        elapsed: notification.elapsed,
        error_occurred: notification.error_occurred,
    })
}

/// Iterates newline-packed chunks (§4.7); aborts the remaining chunks on
/// cancellation or on any chunk's final send failure.
async fn send_message<C: BotClient>(
    bot_client: &C,
    chat_id: i64,
    rate_limiter: &RateLimiter,
    config: &NotifierConfig,
    cancel: &CancellationToken,
    text: &str,
) {
    for chunk in chunk_message(text, CHUNK_LIMIT) {
        if cancel.is_cancelled() {
            return;
        }
        if let Err(e) = send_chunk(bot_client, chat_id, rate_limiter, config, cancel, &chunk).await {
            log::warn!("giving up on a notification after retries: {}", crate::error::Error::from(e));
            return;
        }
    }
}

async fn send_chunk<C: BotClient>(
    bot_client: &C,
    chat_id: i64,
    rate_limiter: &RateLimiter,
    config: &NotifierConfig,
    cancel: &CancellationToken,
    text: &str,
) -> Result<(), SendError> {
    attempt_with_retry(bot_client, chat_id, rate_limiter, config, cancel, text, true).await
}

/// The retry/fallback state machine (§4.8). Recurses once, in plain text,
/// when an HTML attempt is rejected with `400` — a fresh retry cycle that
/// does not consume the HTML budget (P5).
fn attempt_with_retry<'a, C: BotClient>(
    bot_client: &'a C,
    chat_id: i64,
    rate_limiter: &'a RateLimiter,
    config: &'a NotifierConfig,
    cancel: &'a CancellationToken,
    text: &'a str,
    use_html: bool,
) -> Pin<Box<dyn Future<Output = Result<(), SendError>> + Send + 'a>> {
    Box::pin(async move {
        let parse_mode = if use_html {
            ParseMode::Html
        } else {
            ParseMode::Plain
        };

        let mut last_err: Option<SendError> = None;

        for attempt in 1..=config.max_retries {
            // Pre-attempt cancellation is logged distinctly from a failed
            // send (§7: "distinguish DeadlineExceeded in the log").
            if cancel.is_cancelled() {
                log::debug!("{}", crate::error::Error::DeadlineExceeded);
                return Err(last_err.unwrap_or(SendError::Network("canceled".to_string())));
            }

            // Consulted before every attempt, including retries (P6).
            if !rate_limiter.wait(cancel).await {
                log::debug!("{}", crate::error::Error::DeadlineExceeded);
                return Err(last_err.unwrap_or(SendError::Network("canceled".to_string())));
            }

            let message = SendMessage {
                chat_id,
                text: text.to_string(),
                parse_mode,
            };

            match bot_client.send_message(message).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let code = e.code();

                    if code == Some(400) && use_html {
                        return attempt_with_retry(
                            bot_client,
                            chat_id,
                            rate_limiter,
                            config,
                            cancel,
                            text,
                            false,
                        )
                        .await;
                    }

                    if let Some(code) = code {
                        if code != 429 && (400..500).contains(&code) {
                            return Err(e);
                        }
                    }

                    if attempt == config.max_retries {
                        return Err(e);
                    }

                    let backoff = e
                        .retry_after()
                        .map(Duration::from_secs)
                        .unwrap_or(config.retry_delay);
                    last_err = Some(e);

                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            log::debug!("{}", crate::error::Error::DeadlineExceeded);
                            return Err(last_err.unwrap());
                        }
                        () = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        Err(last_err.unwrap_or(SendError::Network("retries exhausted".to_string())))
    })
}
