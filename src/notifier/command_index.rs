//! Immutable, construction-time-checked command lookup tables (spec §3's
//! `BotCommand` invariant, §6 "command index populated from `Tasks[*]`").
//! Safe to read concurrently once built — no interior mutability needed.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::ids::{TaskCommandId, TaskId};
use crate::notification::BotCommand;

const HELP_COMMAND: &str = "help";

pub struct CommandIndex {
    by_name: HashMap<String, BotCommand>,
    by_task_command: HashMap<(TaskId, TaskCommandId), BotCommand>,
}

impl CommandIndex {
    /// Builds the index from every `Notifier.Usable` command plus a
    /// synthetic `help` entry. Fails with `InvalidInput` on a duplicate
    /// name — a construction-time fatal error per §3.
    pub fn build(commands: impl IntoIterator<Item = BotCommand>) -> Result<Self> {
        let mut by_name = HashMap::new();
        let mut by_task_command = HashMap::new();

        let help = BotCommand {
            name: HELP_COMMAND.to_string(),
            title: "도움말".to_string(),
            description: "사용 가능한 명령어 목록을 보여줍니다".to_string(),
            task_id: TaskId::new(""),
            command_id: TaskCommandId::new(""),
        };
        by_name.insert(help.name.clone(), help);

        for cmd in commands {
            if by_name.contains_key(&cmd.name) {
                return Err(Error::InvalidInput(format!(
                    "duplicate bot command name {}",
                    cmd.name
                )));
            }
            by_task_command.insert((cmd.task_id.clone(), cmd.command_id.clone()), cmd.clone());
            by_name.insert(cmd.name.clone(), cmd);
        }

        Ok(Self {
            by_name,
            by_task_command,
        })
    }

    pub fn by_name(&self, name: &str) -> Option<&BotCommand> {
        self.by_name.get(name)
    }

    /// Resolves a notification's title when `Notification.Title` is absent
    /// (§4.6 step 1).
    pub fn title_for(&self, task_id: &TaskId, command_id: &TaskCommandId) -> Option<&str> {
        self.by_task_command
            .get(&(task_id.clone(), command_id.clone()))
            .map(|cmd| cmd.title.as_str())
    }

    /// Every registered command except the synthetic `help` entry, sorted
    /// by name for a deterministic help reply (S1).
    pub fn listed_commands(&self) -> Vec<&BotCommand> {
        let mut commands: Vec<_> = self
            .by_name
            .values()
            .filter(|cmd| cmd.name != HELP_COMMAND)
            .collect();
        commands.sort_by(|a, b| a.name.cmp(&b.name));
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(name: &str, task: &str, cmd: &str) -> BotCommand {
        BotCommand {
            name: name.to_string(),
            title: format!("{name} title"),
            description: format!("{name} description"),
            task_id: TaskId::new(task),
            command_id: TaskCommandId::new(cmd),
        }
    }

    #[test]
    fn duplicate_name_is_invalid_input() {
        let result = CommandIndex::build([
            command("price_watch_daily", "price_watch", "daily"),
            command("price_watch_daily", "other_task", "other_cmd"),
        ]);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn help_is_always_present_and_excluded_from_listing() {
        let index = CommandIndex::build([command("price_watch_daily", "price_watch", "daily")]).unwrap();
        assert!(index.by_name("help").is_some());
        assert_eq!(index.listed_commands().len(), 1);
    }

    #[test]
    fn title_resolves_by_task_and_command_id() {
        let index = CommandIndex::build([command("price_watch_daily", "price_watch", "daily")]).unwrap();
        let title = index.title_for(&TaskId::new("price_watch"), &TaskCommandId::new("daily"));
        assert_eq!(title, Some("price_watch_daily title"));
    }
}
