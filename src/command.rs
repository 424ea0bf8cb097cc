//! Interactive commands for the DND client.
//!
//! This module defines the [`Command`] enum, which captures one line typed at the
//! `dnd_cli` prompt, and the parser turning such a line into a command.
//!
//! # Overview
//! Supported input:
//!
//! - `.exit`: close the session and leave.
//! - `fields`: list the server's fields with their read/write classes.
//! - `readable <class>` / `writable <class>`: fields open to an access class.
//! - `lookup <subject>[, field ...]`: look a subject up.
//! - `count <subject>`: number of entries matching a subject.
//! - `unique <subject>[, field ...]`: look up only an unambiguous subject.
//! - `validate <subject>[, field ...]`: validate, prompting for a password.
//! - `noop`, `unpriv`.
//!
//! # Example
//! ```rust
//! use dnd::Command;
//!
//! let cmd = Command::try_from("lookup jane doe, name email").unwrap();
//! assert_eq!(
//!     cmd,
//!     Command::Lookup {
//!         subject: "jane doe".to_string(),
//!         fields: vec!["name".to_string(), "email".to_string()],
//!     }
//! );
//! ```
use std::io;

use thiserror::Error;

use crate::{error::DndError, fields::Permission};

/// List of possible errors raised while reading or running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid '{command}' command, {reason}")]
    InvalidCommandArguments { command: String, reason: String },

    #[error("no command provided")]
    Empty,

    #[error(transparent)]
    Session(#[from] DndError),

    #[error("console IO error: {0}")]
    Io(#[from] io::Error),
}

/// High-level user supplied commands to run against a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Close the session and terminate the process.
    Exit,
    Fields,
    Readable(Permission),
    Writable(Permission),
    Lookup { subject: String, fields: Vec<String> },
    Count(String),
    Unique { subject: String, fields: Vec<String> },
    Validate { subject: String, fields: Vec<String> },
    Noop,
    Unprivilege,
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let line = value.trim();
        if line.is_empty() {
            return Err(CommandError::Empty);
        }

        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match verb.to_lowercase().as_str() {
            ".exit" | "quit" => Ok(Command::Exit),
            "fields" => Ok(Command::Fields),
            "noop" => Ok(Command::Noop),
            "unpriv" => Ok(Command::Unprivilege),
            "readable" | "writable" => {
                let class = rest.parse::<Permission>().map_err(|e| {
                    CommandError::InvalidCommandArguments {
                        command: verb.to_string(),
                        reason: format!("{e}. Example: {verb} any"),
                    }
                })?;
                if verb.eq_ignore_ascii_case("readable") {
                    Ok(Command::Readable(class))
                } else {
                    Ok(Command::Writable(class))
                }
            }
            "count" => {
                let (subject, _) = subject_and_fields(verb, rest)?;
                Ok(Command::Count(subject))
            }
            "lookup" => {
                let (subject, fields) = subject_and_fields(verb, rest)?;
                Ok(Command::Lookup { subject, fields })
            }
            "unique" => {
                let (subject, fields) = subject_and_fields(verb, rest)?;
                Ok(Command::Unique { subject, fields })
            }
            "validate" => {
                let (subject, fields) = subject_and_fields(verb, rest)?;
                Ok(Command::Validate { subject, fields })
            }
            _ => Err(CommandError::UnrecognizedCommand(line.to_string())),
        }
    }
}

/// Splits `subject[, field field ...]`; fields may be separated by spaces or commas.
fn subject_and_fields(verb: &str, rest: &str) -> Result<(String, Vec<String>), CommandError> {
    let (subject, fields) = rest.split_once(',').unwrap_or((rest, ""));
    let subject = subject.trim();

    if subject.is_empty() {
        return Err(CommandError::InvalidCommandArguments {
            command: verb.to_string(),
            reason: format!("requires a subject. Example: {verb} jane doe, name"),
        });
    }

    let fields = fields
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    Ok((subject.to_string(), fields))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_from_string() {
        let inputs = vec![
            (".exit", Command::Exit),
            ("fields", Command::Fields),
            ("NOOP", Command::Noop),
            ("unpriv", Command::Unprivilege),
            ("readable user", Command::Readable(Permission::User)),
            ("writable A", Command::Writable(Permission::Any)),
            ("count jane doe", Command::Count("jane doe".to_string())),
        ];

        for (cmd, expected) in inputs {
            let command: Command = cmd.try_into().unwrap();
            assert_eq!(command, expected);
        }
    }

    #[test]
    fn lookup_with_fields() {
        let command = Command::try_from("lookup  unique ,field1, field9 field13").unwrap();

        assert_eq!(
            command,
            Command::Lookup {
                subject: "unique".to_string(),
                fields: vec![
                    "field1".to_string(),
                    "field9".to_string(),
                    "field13".to_string()
                ],
            }
        );
    }

    #[test]
    fn validate_without_fields() {
        let command = Command::try_from("validate unique").unwrap();

        assert_eq!(
            command,
            Command::Validate {
                subject: "unique".to_string(),
                fields: vec![],
            }
        );
    }

    #[test]
    #[should_panic(expected = "InvalidCommandArguments")]
    fn lookup_requires_subject() {
        Command::try_from("lookup , name").unwrap();
    }

    #[test]
    #[should_panic(expected = "InvalidCommandArguments")]
    fn readable_requires_class() {
        Command::try_from("readable admin").unwrap();
    }

    #[test]
    #[should_panic(expected = "UnrecognizedCommand")]
    fn unknown_command() {
        Command::try_from("change name x").unwrap();
    }

    #[test]
    #[should_panic(expected = "Empty")]
    fn empty_command() {
        Command::try_from("   ").unwrap();
    }
}
