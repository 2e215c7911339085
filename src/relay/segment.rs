//! Cutting chat text into IRC lines.
//!
//! Chat messages can be long and multi-line; an IRC `PRIVMSG` is one line
//! of bounded length and cannot be empty.

use crate::irc::message::OutboundLine;

/// Markers that turn a one-line message into an action: `_waves_`.
const EMPHASIS_MARKERS: [char; 2] = ['_', '*'];

/// Split chat text into lines of at most `limit` characters.
///
/// With `is_action` every line goes out as an action. Otherwise a short
/// single line wrapped in one emphasis marker becomes an action on its own.
pub fn segment(text: &str, limit: usize, is_action: bool) -> Vec<OutboundLine> {
    let limit = limit.max(1);
    let text = normalize(text);

    if !is_action {
        if let Some(inner) = emphasized_line(&text, limit) {
            return vec![OutboundLine::Action(inner.to_owned())];
        }
    }

    let wrap = |line: String| {
        if is_action {
            OutboundLine::Action(line)
        } else {
            OutboundLine::Message(line)
        }
    };

    text.split('\n')
        .filter(|line| !line.trim().is_empty() && !is_fence(line))
        .flat_map(|line| word_wrap(line, limit))
        .map(wrap)
        .collect()
}

fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").trim().to_owned()
}

/// ```` ``` ```` or ```` ```rust ```` on a line of its own.
fn is_fence(line: &str) -> bool {
    line.trim()
        .strip_prefix("```")
        .is_some_and(|lang| lang.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-'))
}

fn emphasized_line(text: &str, limit: usize) -> Option<&str> {
    if text.contains('\n') || text.chars().count() >= limit {
        return None;
    }
    EMPHASIS_MARKERS.iter().find_map(|&marker| {
        let inner = text.strip_prefix(marker)?.strip_suffix(marker)?;
        // `__bold__`, `**bold**`, and `_a_ and _b_` are not one emphasis.
        if inner.trim().is_empty() || inner.contains(marker) {
            return None;
        }
        Some(inner)
    })
}

/// Wrap one line at word boundaries; a word longer than `limit` is cut.
fn word_wrap(line: &str, limit: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in line.split_whitespace() {
        let word_len = word.chars().count();

        if word_len > limit {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            let mut chunks = chars.chunks(limit).peekable();
            while let Some(chunk) = chunks.next() {
                let piece: String = chunk.iter().collect();
                if chunks.peek().is_some() {
                    lines.push(piece);
                } else {
                    current_len = chunk.len();
                    current = piece;
                }
            }
            continue;
        }

        let needed = if current.is_empty() { word_len } else { current_len + 1 + word_len };
        if needed > limit {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn texts(lines: &[OutboundLine]) -> Vec<&str> {
        lines.iter().map(OutboundLine::text).collect()
    }

    #[test]
    fn short_line_passes_through() {
        assert_eq!(segment("  hello  ", 400, false), vec![OutboundLine::Message("hello".into())]);
    }

    #[test]
    fn newlines_become_separate_lines_and_blanks_are_skipped() {
        let lines = segment("one\r\n\r\ntwo\rthree\n   \n", 400, false);
        assert_eq!(texts(&lines), vec!["one", "two", "three"]);
    }

    #[test]
    fn code_fences_are_dropped() {
        let lines = segment("```rust\nfn main() {}\n```", 400, false);
        assert_eq!(texts(&lines), vec!["fn main() {}"]);
    }

    #[test]
    fn emphasis_becomes_action() {
        assert_eq!(segment("_waves_", 400, false), vec![OutboundLine::Action("waves".into())]);
        assert_eq!(segment("*shrugs*", 400, false), vec![OutboundLine::Action("shrugs".into())]);
        assert_eq!(segment("**bold**", 400, false), vec![OutboundLine::Message("**bold**".into())]);
        assert_eq!(segment("_a_ and _b_", 400, false), vec![OutboundLine::Message("_a_ and _b_".into())]);
        assert_eq!(
            texts(&segment("_multi\nline_", 400, false)),
            vec!["_multi", "line_"]
        );
    }

    #[test]
    fn long_emphasis_is_not_an_action() {
        let text = format!("_{}_", "a ".repeat(10).trim());
        let lines = segment(&text, 10, false);
        assert!(lines.iter().all(|l| matches!(l, OutboundLine::Message(_))));
    }

    #[test]
    fn action_flag_marks_every_line() {
        let lines = segment("dances\nsings", 400, true);
        assert_eq!(
            lines,
            vec![OutboundLine::Action("dances".into()), OutboundLine::Action("sings".into())]
        );
    }

    #[test]
    fn long_line_wraps_at_word_boundaries() {
        let words: Vec<String> = (0..150).map(|i| format!("word{i}")).collect();
        let text = words.join(" ");
        assert!(text.len() > 900);

        let lines = segment(&text, 400, false);
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(line.text().chars().count() <= 400);
            assert!(!line.text().starts_with(' ') && !line.text().ends_with(' '));
        }
        // No word was cut in half.
        let rejoined = texts(&lines).join(" ");
        assert_eq!(rejoined, text);
    }

    #[test]
    fn oversized_word_is_hard_split() {
        let word = "x".repeat(25);
        let lines = segment(&format!("a {word} b"), 10, false);
        assert_eq!(texts(&lines), vec!["a", "xxxxxxxxxx", "xxxxxxxxxx", "xxxxx b"]);
    }

    #[test]
    fn wrap_counts_characters_not_bytes() {
        let lines = segment("ééééé ééééé", 5, false);
        assert_eq!(texts(&lines), vec!["ééééé", "ééééé"]);
    }
}
