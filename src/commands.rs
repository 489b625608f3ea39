//! Chat command parsing and owner lookup for `/asez <command>`.

use serde::Deserialize;

use crate::host::BrickOwner;

pub const COMMAND_NAME: &str = "asez";
pub const PAGE_SIZE: usize = 5;

/// Who typed the command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Caller {
    pub name: String,
    pub id: String,
    #[serde(default)]
    pub is_host: bool,
}

impl Caller {
    /// The local operator running a maintenance subcommand.
    pub fn console() -> Self {
        Caller {
            name: "console".to_string(),
            id: String::new(),
            is_host: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Whisper(String),
    Broadcast(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Help,
    Save,
    List { page: usize },
    Scan,
    /// `None` when the argument wasn't a number
    Keep { id: Option<u64> },
    Load { id: Option<u64> },
    Count { target: String },
    Unknown(String),
}

impl ChatCommand {
    pub fn parse(args: &[String]) -> Self {
        let Some(command) = args.first() else {
            return ChatCommand::Help;
        };
        let arg = args.get(1).map(String::as_str).unwrap_or("");

        match command.as_str() {
            "save" => ChatCommand::Save,
            "list" => ChatCommand::List {
                page: parse_number(arg).map(|p| p as usize).unwrap_or(1),
            },
            "scan" => ChatCommand::Scan,
            "keep" => ChatCommand::Keep { id: parse_number(arg) },
            "load" => ChatCommand::Load { id: parse_number(arg) },
            // names may contain spaces
            "count" => ChatCommand::Count {
                target: args[1..].join(" ").to_lowercase(),
            },
            other => ChatCommand::Unknown(other.to_string()),
        }
    }
}

fn parse_number(arg: &str) -> Option<u64> {
    if arg.is_empty() || !arg.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    arg.parse().ok()
}

/// Find a brick owner by name: exact match, then substring, then initials
/// ("tbp" finds "TheBlackParrot").
pub fn find_owner<'a>(owners: &'a [BrickOwner], target: &str) -> Option<&'a BrickOwner> {
    let target = target.to_lowercase();
    let lowered: Vec<(String, &BrickOwner)> =
        owners.iter().map(|o| (o.name.to_lowercase(), o)).collect();

    lowered
        .iter()
        .find(|(name, _)| *name == target)
        .or_else(|| lowered.iter().find(|(name, _)| name.contains(&target)))
        .or_else(|| lowered.iter().find(|(name, _)| is_subsequence(&target, name)))
        .map(|(_, owner)| *owner)
}

fn is_subsequence(needle: &str, haystack: &str) -> bool {
    let mut hay = haystack.chars();
    needle.chars().all(|c| hay.any(|h| h == c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn owner(name: &str, bricks: u64) -> BrickOwner {
        BrickOwner {
            id: format!("id-{name}"),
            name: name.to_string(),
            bricks,
        }
    }

    #[test]
    fn parses_commands() {
        assert_eq!(ChatCommand::parse(&[]), ChatCommand::Help);
        assert_eq!(ChatCommand::parse(&args(&["save"])), ChatCommand::Save);
        assert_eq!(ChatCommand::parse(&args(&["list"])), ChatCommand::List { page: 1 });
        assert_eq!(ChatCommand::parse(&args(&["list", "3"])), ChatCommand::List { page: 3 });
        assert_eq!(ChatCommand::parse(&args(&["keep", "12"])), ChatCommand::Keep { id: Some(12) });
        assert_eq!(ChatCommand::parse(&args(&["load", "x1"])), ChatCommand::Load { id: None });
        assert_eq!(
            ChatCommand::parse(&args(&["count", "The", "Parrot"])),
            ChatCommand::Count { target: "the parrot".into() }
        );
        assert_eq!(
            ChatCommand::parse(&args(&["nuke"])),
            ChatCommand::Unknown("nuke".into())
        );
    }

    #[test]
    fn ids_must_be_plain_digits() {
        assert_eq!(parse_number("-1"), None);
        assert_eq!(parse_number("+4"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("007"), Some(7));
    }

    #[test]
    fn owner_lookup_prefers_exact_then_substring_then_initials() {
        let owners = vec![
            owner("TheBlackParrot", 10),
            owner("cake", 20),
            owner("cakeface", 30),
        ];

        assert_eq!(find_owner(&owners, "cake").map(|o| o.bricks), Some(20));
        assert_eq!(find_owner(&owners, "face").map(|o| o.bricks), Some(30));
        assert_eq!(find_owner(&owners, "tbp").map(|o| o.bricks), Some(10));
        assert_eq!(find_owner(&owners, "ckf").map(|o| o.bricks), Some(30));
        assert!(find_owner(&owners, "zebra").is_none());
    }
}
