// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Utility functions for markfs.

/// Mask a sensitive string (like a password) for logging.
///
/// Shows only the first `visible_prefix` characters and replaces the rest with "...".
///
/// # Examples
///
/// ```
/// use markfs::utils::mask_sensitive;
///
/// assert_eq!(mask_sensitive("hunter2", 0), "...");
/// assert_eq!(mask_sensitive("alice", 2), "al...");
/// ```
pub fn mask_sensitive(input: &str, visible_prefix: usize) -> String {
    if input.chars().count() <= visible_prefix {
        // Still mask short input to avoid leaking its length
        return format!("{}...", input);
    }

    let prefix: String = input.chars().take(visible_prefix).collect();
    format!("{}...", prefix)
}

/// Render a command line for the log with the argument at `secret` masked.
pub fn redact_command(word: &str, args: &[String], secret: Option<usize>) -> String {
    let mut line = word.to_string();
    for (i, arg) in args.iter().enumerate() {
        line.push(' ');
        if Some(i) == secret {
            line.push_str(&mask_sensitive(arg, 0));
        } else {
            line.push_str(arg);
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_sensitive() {
        assert_eq!(mask_sensitive("secret123", 2), "se...");
        assert_eq!(mask_sensitive("ab", 8), "ab...");
        assert_eq!(mask_sensitive("", 0), "...");
    }

    #[test]
    fn test_redact_command() {
        let args = vec!["alice".to_string(), "secret".to_string(), "40".to_string()];
        assert_eq!(redact_command("login", &args, Some(1)), "login alice ... 40");
        assert_eq!(redact_command("ls", &[".".to_string()], None), "ls .");
        assert_eq!(redact_command("pwd", &[], None), "pwd");
    }
}
