//! Chat command parsing.
//!
//! Recognizes `/install <package>` and `/uninstall <name>` in free-text
//! messages relayed from the communication service.

/// Prefix for install commands.
pub const INSTALL_PREFIX: &str = "/install";

/// Prefix for uninstall commands.
pub const UNINSTALL_PREFIX: &str = "/uninstall";

/// Result of parsing a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/install <package>`.
    Install { package: String },
    /// `/uninstall <name>`.
    Uninstall { name: String },
    /// A recognized prefix with nothing after it.
    MissingTarget { command: &'static str },
    /// Not a command for the skill manager.
    NoMatch,
}

/// Parse a chat message into a skill manager command.
///
/// The prefix is matched case-insensitively and must be followed by
/// whitespace or the end of the message. Only the first token after the
/// prefix is used as the target.
pub fn parse_command(text: &str) -> Command {
    let text = text.trim_start();

    if let Some(target) = match_prefix(text, INSTALL_PREFIX) {
        return match target {
            Some(package) => Command::Install { package },
            None => Command::MissingTarget {
                command: INSTALL_PREFIX,
            },
        };
    }

    if let Some(target) = match_prefix(text, UNINSTALL_PREFIX) {
        return match target {
            Some(name) => Command::Uninstall { name },
            None => Command::MissingTarget {
                command: UNINSTALL_PREFIX,
            },
        };
    }

    Command::NoMatch
}

/// Returns `None` if `text` does not start with `prefix`, `Some(None)` if
/// the prefix matched without a target, and `Some(Some(target))` otherwise.
fn match_prefix(text: &str, prefix: &str) -> Option<Option<String>> {
    let head = text.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }

    let rest = &text[prefix.len()..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }

    Some(rest.split_whitespace().next().map(str::to_string))
}
