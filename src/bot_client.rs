//! The remote-API facade (spec §4.1): four operations, narrowed to exactly
//! what the notifier needs so the runtime can be driven by a mock in tests.

use std::time::Duration;

use frankenstein::AsyncTelegramApi;
use frankenstein::methods::{GetUpdatesParams, SendMessageParams};
use frankenstein::response::{ErrorResponse, ResponseParameters};
use frankenstein::types::AllowedUpdate;

/// Default outer deadline for the HTTP client backing [`FrankensteinBotClient`]
/// when none is configured, per §4.1 ("must honour an outer deadline").
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Html,
    Plain,
}

#[derive(Debug, Clone)]
pub struct Update {
    pub update_id: i64,
    pub chat_id: i64,
    pub text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SendMessage {
    pub chat_id: i64,
    pub text: String,
    pub parse_mode: ParseMode,
}

/// A decoded failure from `send_message`, carrying exactly what the
/// retry/fallback state machine (§4.8) needs: the HTTP-ish status code and
/// an optional server-suggested retry delay.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
    #[error("telegram API error {code}: {description}")]
    Api {
        code: u16,
        retry_after: Option<u64>,
        description: String,
    },
    #[error("network error: {0}")]
    Network(String),
}

impl SendError {
    pub fn code(&self) -> Option<u16> {
        match self {
            SendError::Api { code, .. } => Some(*code),
            SendError::Network(_) => None,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            SendError::Api { retry_after, .. } => *retry_after,
            SendError::Network(_) => None,
        }
    }
}

pub trait BotClient: Clone + Send + Sync + 'static {
    /// Long-polls for the next batch of updates starting after `offset`.
    fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> impl Future<Output = Result<Vec<Update>, SendError>> + Send;

    fn send_message(
        &self,
        message: SendMessage,
    ) -> impl Future<Output = Result<(), SendError>> + Send;

    /// Flushes any in-flight long poll by issuing one zero-timeout request,
    /// so the next process to start polling doesn't receive stale updates.
    fn stop_receiving_updates(&self) -> impl Future<Output = ()> + Send;

    fn get_me(&self) -> impl Future<Output = Result<String, SendError>> + Send;
}

fn decode_error(e: frankenstein::Error) -> SendError {
    match e {
        frankenstein::Error::Api(ErrorResponse {
            error_code,
            description,
            parameters,
            ..
        }) => {
            let retry_after = parameters
                .and_then(|ResponseParameters { retry_after, .. }| retry_after)
                .map(|secs| secs as u64);

            SendError::Api {
                code: error_code as u16,
                retry_after,
                description,
            }
        }
        other => SendError::Network(other.to_string()),
    }
}

/// Wraps `frankenstein::client_reqwest::Bot`, the teacher's own HTTP client
/// (`type Bot = frankenstein::client_reqwest::Bot` in `main.rs`).
#[derive(Clone)]
pub struct FrankensteinBotClient {
    inner: frankenstein::client_reqwest::Bot,
    chat_id: i64,
    offset: std::sync::Arc<std::sync::atomic::AtomicI64>,
}

impl FrankensteinBotClient {
    pub fn new(token: &str, chat_id: i64) -> Self {
        Self {
            inner: frankenstein::client_reqwest::Bot::new(token),
            chat_id,
            offset: std::sync::Arc::new(std::sync::atomic::AtomicI64::new(0)),
        }
    }
}

impl BotClient for FrankensteinBotClient {
    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, SendError> {
        let params = GetUpdatesParams::builder()
            .offset(offset)
            .timeout(timeout_secs as u32)
            .allowed_updates(vec![AllowedUpdate::Message])
            .build();

        let response = self
            .inner
            .get_updates(&params)
            .await
            .map_err(decode_error)?;

        let updates = response
            .result
            .into_iter()
            .filter_map(|update| {
                self.offset
                    .fetch_max(update.update_id as i64 + 1, std::sync::atomic::Ordering::SeqCst);

                let message = match update.content {
                    frankenstein::updates::UpdateContent::Message(msg) => msg,
                    _ => return None,
                };

                Some(Update {
                    update_id: update.update_id as i64,
                    chat_id: message.chat.id,
                    text: message.text,
                })
            })
            .collect();

        Ok(updates)
    }

    async fn send_message(&self, message: SendMessage) -> Result<(), SendError> {
        let parse_mode = match message.parse_mode {
            ParseMode::Html => Some(frankenstein::ParseMode::Html),
            ParseMode::Plain => None,
        };

        let mut builder = SendMessageParams::builder()
            .chat_id(message.chat_id)
            .text(message.text);

        if let Some(parse_mode) = parse_mode {
            builder = builder.parse_mode(parse_mode);
        }

        self.inner
            .send_message(&builder.build())
            .await
            .map(|_| ())
            .map_err(decode_error)
    }

    async fn stop_receiving_updates(&self) {
        let params = GetUpdatesParams::builder()
            .offset(self.offset.load(std::sync::atomic::Ordering::SeqCst))
            .timeout(0)
            .limit(1)
            .build();

        if let Err(e) = self.inner.get_updates(&params).await {
            log::error!("Error marking messages as seen: {e}");
        }
    }

    async fn get_me(&self) -> Result<String, SendError> {
        let me = self.inner.get_me().await.map_err(decode_error)?;
        Ok(me.result.username.unwrap_or_default())
    }
}

impl FrankensteinBotClient {
    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }
}

#[cfg(test)]
pub mod mock {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Default)]
    struct State {
        pending_updates: VecDeque<Vec<Update>>,
        send_script: VecDeque<Result<(), SendError>>,
        sent: Vec<SendMessage>,
        username: String,
    }

    /// A scriptable [`BotClient`] for driving the notifier runtime
    /// deterministically (grounded in the trait-based `Backend` seam the
    /// teacher already uses for testability).
    #[derive(Debug, Clone, Default)]
    pub struct MockBotClient(Arc<Mutex<State>>);

    impl MockBotClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_username(self, username: impl Into<String>) -> Self {
            self.0.lock().unwrap().username = username.into();
            self
        }

        /// Queues one batch of updates to be returned by the next `get_updates`.
        pub fn push_updates(&self, updates: Vec<Update>) {
            self.0.lock().unwrap().pending_updates.push_back(updates);
        }

        /// Queues the next result `send_message` should return, in order.
        pub fn script_send(&self, result: Result<(), SendError>) {
            self.0.lock().unwrap().send_script.push_back(result);
        }

        /// Returns every `send_message` call observed so far, in order.
        pub fn sent_messages(&self) -> Vec<SendMessage> {
            self.0.lock().unwrap().sent.clone()
        }
    }

    impl BotClient for MockBotClient {
        async fn get_updates(&self, _offset: i64, _timeout_secs: u64) -> Result<Vec<Update>, SendError> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .pending_updates
                .pop_front()
                .unwrap_or_default())
        }

        async fn send_message(&self, message: SendMessage) -> Result<(), SendError> {
            let mut state = self.0.lock().unwrap();
            let result = state
                .send_script
                .pop_front()
                .unwrap_or(Ok(()));
            state.sent.push(message);
            result
        }

        async fn stop_receiving_updates(&self) {}

        async fn get_me(&self) -> Result<String, SendError> {
            Ok(self.0.lock().unwrap().username.clone())
        }
    }
}
