//! Process configuration (spec §6, §6.1). A thin, unvalidated mirror of the
//! `AppConfig` JSON shape — no defaulting, no hot-reload; the embedding
//! process is the collaborator responsible for producing a sane file.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::ids::{TaskCommandId, TaskId};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AppConfig {
    #[serde(default)]
    pub debug: bool,
    #[serde(rename = "HTTPRetry")]
    pub http_retry: HttpRetryConfig,
    pub notifier: NotifierSection,
    pub tasks: Vec<TaskEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HttpRetryConfig {
    pub max_retries: u32,
    #[serde(rename = "RetryDelayMs")]
    pub retry_delay_ms: u64,
}

impl HttpRetryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NotifierSection {
    pub telegrams: Vec<TelegramEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TelegramEntry {
    pub id: String,
    pub bot_token: String,
    pub chat_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskEntry {
    pub id: String,
    pub title: String,
    pub commands: Vec<TaskCommandEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskCommandEntry {
    pub id: String,
    pub title: String,
    pub description: String,
    pub notifier: CommandNotifierSection,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandNotifierSection {
    pub usable: bool,
}

/// Loads `AppConfig` from a JSON file. The only collaborator the core
/// provides; validation and defaulting are explicitly someone else's job.
pub fn load(path: impl AsRef<std::path::Path>) -> std::io::Result<AppConfig> {
    let file = std::fs::File::open(path)?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// `snake_case(TaskID) + "_" + snake_case(CommandID)` (§6's bot-command wire
/// format). IDs in this config are already expected to be snake_case, so this
/// just joins them; it does not attempt to reformat arbitrary casing.
pub fn bot_command_name(task_id: &TaskId, command_id: &TaskCommandId) -> String {
    format!("{}_{}", task_id.as_str(), command_id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_documented_shape() {
        let json = r#"{
            "Debug": true,
            "HTTPRetry": { "MaxRetries": 3, "RetryDelayMs": 500 },
            "Notifier": { "Telegrams": [ { "ID": "main", "BotToken": "t", "ChatID": 123 } ] },
            "Tasks": [
                { "ID": "price_watch", "Title": "Price Watch", "Commands": [
                    { "ID": "daily", "Title": "Daily", "Description": "d",
                      "Notifier": { "Usable": true }, "Data": {} }
                ] }
            ]
        }"#;

        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert!(config.debug);
        assert_eq!(config.http_retry.max_retries, 3);
        assert_eq!(config.notifier.telegrams[0].chat_id, 123);
        assert_eq!(config.tasks[0].commands[0].notifier.usable, true);
    }

    #[test]
    fn bot_command_name_joins_task_and_command_ids() {
        let name = bot_command_name(&TaskId::new("price_watch"), &TaskCommandId::new("daily"));
        assert_eq!(name, "price_watch_daily");
    }
}
