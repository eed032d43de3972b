//! Command definitions
//!
//! Represents operations requested by the CLI and REPL front ends.
//!
//! ## Text Grammar
//! ```text
//! set <key> <value...>     value is the rest of the line
//! get <key>
//! delete <key>             (alias: del)
//! compact
//! ```

use crate::error::{CaskError, Result};

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Get a value by key
    Get { key: Vec<u8> },

    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },

    /// Merge sealed segments
    Compact,
}

impl Command {
    /// Parse one line of REPL input
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        match verb.to_ascii_lowercase().as_str() {
            "set" | "put" => {
                let (key, value) = rest
                    .split_once(char::is_whitespace)
                    .map(|(k, v)| (k, v.trim_start()))
                    .ok_or_else(|| CaskError::Command("usage: set <key> <value>".to_string()))?;
                Ok(Command::Put {
                    key: key.as_bytes().to_vec(),
                    value: value.as_bytes().to_vec(),
                })
            }
            "get" => Ok(Command::Get {
                key: single_key(rest, "get")?,
            }),
            "delete" | "del" => Ok(Command::Delete {
                key: single_key(rest, "delete")?,
            }),
            "compact" if rest.is_empty() => Ok(Command::Compact),
            "" => Err(CaskError::Command("empty command".to_string())),
            _ => Err(CaskError::Command(format!("unknown command: {}", line))),
        }
    }

    /// Whether the command changes the store
    pub fn is_write(&self) -> bool {
        !matches!(self, Command::Get { .. })
    }
}

fn single_key(rest: &str, verb: &str) -> Result<Vec<u8>> {
    if rest.is_empty() || rest.contains(char::is_whitespace) {
        return Err(CaskError::Command(format!("usage: {} <key>", verb)));
    }
    Ok(rest.as_bytes().to_vec())
}
