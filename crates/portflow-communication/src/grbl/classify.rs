//! Outgoing-command classification
//!
//! Pure predicates that tag a command string with its protocol-relevant
//! properties: whether the device will acknowledge it, whether it bypasses
//! buffer accounting, and whether it pauses, unpauses, or wipes the buffer.
//! All predicates evaluate the command after comment stripping and are
//! independently composable; callers decide how to route a command from the
//! combination.

/// Soft-reset control character (Ctrl-X)
pub const SOFT_RESET: char = '\u{18}';

/// Protocol-relevant properties of an outgoing command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandTags {
    /// Device consumes the command without a line-oriented acknowledgment.
    pub no_response: bool,
    /// Command invalidates the device's and the ledger's pending state.
    pub wipes_buffer: bool,
    /// Command is processed immediately regardless of buffer fullness.
    pub skips_accounting: bool,
    /// Command triggers a feed hold.
    pub pauses: bool,
    /// Command triggers a cycle start.
    pub unpauses: bool,
}

#[derive(Clone, Copy)]
enum Tag {
    NoResponse,
    WipesBuffer,
    SkipsAccounting,
    Pauses,
    Unpauses,
}

impl CommandTags {
    fn set(&mut self, tag: Tag) {
        match tag {
            Tag::NoResponse => self.no_response = true,
            Tag::WipesBuffer => self.wipes_buffer = true,
            Tag::SkipsAccounting => self.skips_accounting = true,
            Tag::Pauses => self.pauses = true,
            Tag::Unpauses => self.unpauses = true,
        }
    }
}

/// Ordered classification table; every predicate runs, tags accumulate
const CLASSIFIERS: &[(fn(&str) -> bool, Tag)] = &[
    (expects_no_response, Tag::NoResponse),
    (wipes_buffer, Tag::WipesBuffer),
    (skips_buffer_accounting, Tag::SkipsAccounting),
    (triggers_pause, Tag::Pauses),
    (triggers_unpause, Tag::Unpauses),
];

/// Evaluate every predicate against a command
pub fn classify(cmd: &str) -> CommandTags {
    let mut tags = CommandTags::default();
    for (predicate, tag) in CLASSIFIERS {
        if predicate(cmd) {
            tags.set(*tag);
        }
    }
    tags
}

/// Strip parenthesized and `;`-to-end-of-line comments
///
/// Parenthesized comments never span lines; an unclosed `(` is kept as-is.
/// Line comments end at the newline, which is preserved.
pub fn strip_comments(cmd: &str) -> String {
    strip_line_comments(&strip_paren_comments(cmd))
}

fn strip_paren_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('(') {
        let after = &rest[start + 1..];
        match (after.find(')'), after.find('\n')) {
            (Some(close), newline) if newline.map_or(true, |n| close < n) => {
                out.push_str(&rest[..start]);
                rest = &after[close + 1..];
            }
            _ => {
                // No closing paren on this line; the '(' is literal
                out.push_str(&rest[..start + 1]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn strip_line_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find(';') {
        out.push_str(&rest[..start]);
        match rest[start..].find('\n') {
            Some(newline) => rest = &rest[start + newline..],
            None => rest = "",
        }
    }
    out.push_str(rest);
    out
}

/// Check whether the device consumes a command without acknowledging it
///
/// True when the command, after comment stripping and tolerating one
/// trailing newline, is exactly one of the real-time/query forms `!`, `~`,
/// `%`, a bare newline, `$`, `?`, or `$$`. Setting writes like `$10=1`
/// receive a normal `ok` and are not in this set.
pub fn expects_no_response(cmd: &str) -> bool {
    let stripped = strip_comments(cmd);
    let core = stripped.strip_suffix('\n').unwrap_or(&stripped);
    if core.is_empty() {
        return stripped == "\n";
    }
    matches!(core, "!" | "~" | "%" | "$" | "?" | "$$")
}

/// Check whether a command invalidates all pending device state
pub fn wipes_buffer(cmd: &str) -> bool {
    let stripped = strip_comments(cmd);
    stripped.chars().any(|c| c == '%' || c == SOFT_RESET)
}

/// Check whether a command bypasses buffer accounting
///
/// Real-time characters and the extended range U+0080..=U+00FF are acted on
/// by the device immediately, regardless of buffer fullness.
pub fn skips_buffer_accounting(cmd: &str) -> bool {
    let stripped = strip_comments(cmd);
    stripped
        .chars()
        .any(|c| matches!(c, '!' | '~' | '?') || c == SOFT_RESET || ('\u{80}'..='\u{ff}').contains(&c))
}

/// Check whether a command triggers a feed hold
pub fn triggers_pause(cmd: &str) -> bool {
    strip_comments(cmd).contains('!')
}

/// Check whether a command triggers a cycle start
pub fn triggers_unpause(cmd: &str) -> bool {
    strip_comments(cmd).contains('~')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_paren_comments() {
        assert_eq!(strip_comments("G1 X0 (move home) Y0"), "G1 X0  Y0");
        assert_eq!(strip_comments("(a)(b)G0"), "G0");
        assert_eq!(strip_comments("G1 (unclosed"), "G1 (unclosed");
        assert_eq!(strip_comments("G1 (open\n) G2"), "G1 (open\n) G2");
    }

    #[test]
    fn test_strip_line_comments() {
        assert_eq!(strip_comments("G1 X0 ; rapid"), "G1 X0 ");
        assert_eq!(strip_comments("G1 ; a\nG2 ; b"), "G1 \nG2 ");
        assert_eq!(strip_comments("; whole line"), "");
    }

    #[test]
    fn test_no_response_realtime_chars() {
        assert!(expects_no_response("!"));
        assert!(expects_no_response("~\n"));
        assert!(expects_no_response("%"));
        assert!(expects_no_response("?"));
        assert!(expects_no_response("$"));
        assert!(expects_no_response("$$\n"));
        assert!(expects_no_response("\n"));
    }

    #[test]
    fn test_no_response_rejects_normal_commands() {
        assert!(!expects_no_response("G0 X0\n"));
        assert!(!expects_no_response("$10=1\n"));
        assert!(!expects_no_response("$H\n"));
        assert!(!expects_no_response(""));
        assert!(!expects_no_response("\n\n"));
    }

    #[test]
    fn test_wipes_buffer() {
        assert!(wipes_buffer("%"));
        assert!(wipes_buffer("\u{18}"));
        assert!(!wipes_buffer("G0 X0"));
        // A % hidden in a comment does not count
        assert!(!wipes_buffer("G0 (50%)"));
    }

    #[test]
    fn test_skips_buffer_accounting() {
        assert!(skips_buffer_accounting("!"));
        assert!(skips_buffer_accounting("~"));
        assert!(skips_buffer_accounting("?"));
        assert!(skips_buffer_accounting("\u{18}"));
        // Extended real-time commands (feed override etc.)
        assert!(skips_buffer_accounting("\u{90}"));
        assert!(skips_buffer_accounting("\u{ff}"));
        assert!(!skips_buffer_accounting("G0 X0"));
        assert!(!skips_buffer_accounting("%"));
    }

    #[test]
    fn test_pause_unpause() {
        assert!(triggers_pause("!"));
        assert!(!triggers_pause("~"));
        assert!(triggers_unpause("~"));
        assert!(!triggers_unpause("!"));
        assert!(!triggers_pause("G4 P1 (wait!)"));
    }

    #[test]
    fn test_classify_composes_tags() {
        let tags = classify("!");
        assert!(tags.no_response);
        assert!(tags.skips_accounting);
        assert!(tags.pauses);
        assert!(!tags.unpauses);
        assert!(!tags.wipes_buffer);

        let tags = classify("G0 X0\n");
        assert_eq!(tags, CommandTags::default());

        let tags = classify("%");
        assert!(tags.no_response);
        assert!(tags.wipes_buffer);
        assert!(!tags.skips_accounting);
    }
}
