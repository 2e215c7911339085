//! Mentions in both directions.
//!
//! Towards IRC, chat mention tokens (`<@123>`, `<#456>`, `@everyone`, custom
//! emoji) become plain names. Towards chat, puppet nicknames said on IRC
//! become highlights of the speaker behind the puppet.

use crate::chat::{Mention, MentionKind, SpeakerId};

/// Rewrite every mention token in `text` to readable text.
///
/// `user_name` picks the name shown for a user mention, so a speaker with a
/// puppet is named by the puppet's live nickname.
pub fn render_mentions<F>(text: &str, mentions: &[Mention], mut user_name: F) -> String
where
    F: FnMut(&Mention) -> String,
{
    let mut content = text.to_owned();
    for mention in mentions {
        if mention.token.is_empty() {
            continue;
        }
        let name = match mention.kind {
            MentionKind::User => user_name(mention),
            MentionKind::Channel => format!("chat channel #{}", mention.name),
            MentionKind::Role => mention.name.clone(),
            MentionKind::Everyone => "all".to_owned(),
            MentionKind::Emoji => format!(":{}:", mention.name),
        };
        content = replace_token(&content, &mention.token, &name);
    }
    content
}

/// A token opening the line is IRC addressing (`name: rest`); anywhere else
/// it is replaced inline.
fn replace_token(content: &str, token: &str, name: &str) -> String {
    if let Some(rest) = content.strip_prefix(token) {
        if !rest.is_empty() && !rest.starts_with(':') {
            return format!("{name}: {}", rest.trim_start().replace(token, name));
        }
    }
    content.replace(token, name)
}

/// Replace known puppet nicknames in an IRC line with chat highlights.
///
/// Only whole words match, and space-separated parts that look like URLs
/// are left alone. `"nick: hi"` collapses to `"<@id> hi"`.
pub fn highlight_puppets(text: &str, puppets: &[(&str, SpeakerId)]) -> String {
    let mut message = text.to_owned();
    for &(nick, speaker_id) in puppets {
        if nick.is_empty() {
            continue;
        }
        let highlight = speaker_id.mention();
        message = message
            .split(' ')
            .map(|part| {
                if part.contains("://") {
                    part.to_owned()
                } else {
                    replace_word(part, nick, &highlight)
                }
            })
            .collect::<Vec<_>>()
            .join(" ");

        let addressed = format!("{highlight}: ");
        if let Some(rest) = message.strip_prefix(&addressed) {
            message = format!("{highlight} {rest}");
        }
    }
    message
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Replace `word` where it is not preceded or followed by a word character.
fn replace_word(haystack: &str, word: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(haystack.len());
    let mut last = 0;
    for (start, _) in haystack.match_indices(word) {
        if start < last {
            continue;
        }
        let end = start + word.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        if before.is_some_and(is_word_char) || after.is_some_and(is_word_char) {
            continue;
        }
        out.push_str(&haystack[last..start]);
        out.push_str(replacement);
        last = end;
    }
    out.push_str(&haystack[last..]);
    out
}
