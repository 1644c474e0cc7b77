//! Normalization of raw tool output before classification.

use std::sync::LazyLock;

use regex::Regex;

// CSI sequences, OSC sequences (BEL or ST terminated), then lone two-byte escapes.
static ESCAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]").unwrap()
});

/// Strip terminal control sequences from a raw line.
///
/// Returns `None` when nothing printable is left. Carriage-return progress
/// updates keep only the last rewrite of the line that still has text; a
/// trailing rewrite that only blanks the line is ignored.
pub fn sanitize_line(raw: &str) -> Option<String> {
    let stripped = ESCAPE_RE.replace_all(raw, "");
    let line = stripped.trim_end_matches(['\n', '\r']);
    line.rsplit('\r').find_map(printable)
}

fn printable(segment: &str) -> Option<String> {
    let cleaned: String = segment
        .chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .collect();
    let cleaned = cleaned.trim_end();
    if cleaned.trim().is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_color_codes() {
        assert_eq!(
            sanitize_line("\x1b[31m[ERROR]\x1b[0m solver failed\n").as_deref(),
            Some("[ERROR] solver failed")
        );
    }

    #[test]
    fn strips_osc_titles() {
        assert_eq!(
            sanitize_line("\x1b]0;simnibs\x07Loading mesh").as_deref(),
            Some("Loading mesh")
        );
    }

    #[test]
    fn keeps_last_carriage_return_segment() {
        assert_eq!(
            sanitize_line("progress 10%\rprogress 55%\r\n").as_deref(),
            Some("progress 55%")
        );
    }

    #[test]
    fn blank_rewrite_keeps_previous_text() {
        assert_eq!(
            sanitize_line("[ERROR] disk full\r   \n").as_deref(),
            Some("[ERROR] disk full")
        );
        assert_eq!(
            sanitize_line("progress 90%\r\x1b[2K   \r").as_deref(),
            Some("progress 90%")
        );
    }

    #[test]
    fn blank_lines_are_dropped() {
        assert_eq!(sanitize_line(""), None);
        assert_eq!(sanitize_line("   \t\r\n"), None);
        assert_eq!(sanitize_line("\x1b[2K\x1b[1G"), None);
    }

    #[test]
    fn preserves_leading_indentation() {
        assert_eq!(
            sanitize_line("    - electrode E1\n").as_deref(),
            Some("    - electrode E1")
        );
    }
}
