use regex::{Regex, RegexBuilder, escape};

/// A `/name[@username] [param]` command as typed by a user.
#[derive(Debug, Clone, Copy)]
pub struct ParsedCommand<'a> {
    pub command: &'a str,
    pub username: Option<&'a str>,
    pub param: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct CommandParser(Regex);

impl CommandParser {
    pub fn new(username: Option<&str>) -> Self {
        let pattern = if let Some(username) = username {
            &format!("^/([a-z0-9_]+)(?:@({}))?(?:\\s+(.*))?$", escape(username))
        } else {
            log::warn!("Bot has no username!");
            "^/([a-z0-9_]+)(?:@([a-z0-9_]+))?(?:\\s+(.*))?$"
        };

        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()
            .expect("regex should be valid!");

        Self(regex)
    }

    pub fn parse<'a>(&self, text: &'a str) -> Option<ParsedCommand<'a>> {
        self.0.captures(text).map(|captures| {
            let command = captures.get(1).expect("group matches always").as_str();
            let param;
            let username;
            if captures.len() == 4 {
                username = captures.get(2).map(|m| m.as_str());
                param = captures.get(3).map(|m| m.as_str());
            } else {
                username = None;
                param = captures.get(2).map(|m| m.as_str());
            }

            ParsedCommand {
                command,
                param,
                username,
            }
        })
    }
}
