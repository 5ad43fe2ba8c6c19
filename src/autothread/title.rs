use chrono::{DateTime, Local};

use crate::autothread::detector::ThreadMessage;
use crate::autothread::util::truncate_with_ellipsis;

pub const MAX_TITLE_CHARS: usize = 35;

/// One-word acknowledgements that never make a useful title.
const FILLER_TOKENS: [&str; 9] = ["hi", "hello", "hey", "yo", "test", "ok", "yes", "no", "?"];

const VOICE_ATTACHMENT_KINDS: [&str; 3] = ["voice", "audio", "video_note"];

fn is_filler(text: &str) -> bool {
    let token = text.trim().to_lowercase();
    FILLER_TOKENS.contains(&token.as_str())
}

/// Our own openers (the welcome included) carry no topic information.
fn is_own_greeting(text: &str) -> bool {
    let t = text.trim_start().to_lowercase();
    t.starts_with("hey") || t.starts_with("hi") || t.starts_with("hello") || t.starts_with("👋")
}

fn question_title(text: &str) -> Option<String> {
    let idx = text.find('?')?;
    let candidate = text[..=idx].trim();
    if candidate.is_empty() {
        return None;
    }
    Some(truncate_with_ellipsis(candidate, MAX_TITLE_CHARS))
}

fn substantial_title(text: &str) -> Option<String> {
    if text.trim().chars().count() <= 10 {
        return None;
    }
    let mut candidate = text.trim().lines().next().unwrap_or("");
    if let Some(dot) = candidate.find('.') {
        candidate = &candidate[..dot];
    }
    let candidate = candidate.trim();
    if candidate.chars().count() <= 5 {
        return None;
    }
    Some(truncate_with_ellipsis(candidate, MAX_TITLE_CHARS))
}

fn own_label_title(text: &str) -> Option<String> {
    for line in text.lines() {
        let line = line.trim();

        if let Some(start) = line.find("**") {
            let rest = &line[start + 2..];
            if let Some(end) = rest.find("**") {
                let label = rest[..end].trim();
                if !label.is_empty() {
                    return Some(truncate_with_ellipsis(label, MAX_TITLE_CHARS));
                }
            }
        }

        if line.chars().count() > 15
            && let Some(colon_pos) = line.chars().position(|c| c == ':')
            && colon_pos < 30
        {
            let label: String = line.chars().take(colon_pos).collect();
            let label = label.trim();
            if label.chars().count() > 5 {
                return Some(truncate_with_ellipsis(label, MAX_TITLE_CHARS));
            }
        }
    }

    None
}

/// Derives an archive title from the exchange, at most [`MAX_TITLE_CHARS`]
/// characters plus an ellipsis. Rules run strictly in order: user question,
/// substantial user message, label in one of our own messages, attachment
/// placeholder, timestamp fallback. Pure apart from the caller-supplied
/// clock, so the same input always yields the same title.
pub fn derive_title(
    messages: &[ThreadMessage],
    own_account_id: i64,
    now: DateTime<Local>,
) -> String {
    let mut ordered: Vec<&ThreadMessage> = messages.iter().collect();
    ordered.sort_by_key(|m| m.timestamp);

    let user_texts: Vec<&str> = ordered
        .iter()
        .filter(|m| m.sender_id != own_account_id)
        .map(|m| m.text.trim())
        .filter(|t| !t.is_empty() && !is_filler(t))
        .collect();

    for text in &user_texts {
        if let Some(title) = question_title(text) {
            return title;
        }
    }

    for text in &user_texts {
        if let Some(title) = substantial_title(text) {
            return title;
        }
    }

    for message in &ordered {
        if message.sender_id != own_account_id || is_own_greeting(&message.text) {
            continue;
        }
        if let Some(title) = own_label_title(&message.text) {
            return title;
        }
    }

    let stamp = now.format("%b %d %H:%M");
    if let Some(kind) = ordered
        .iter()
        .find(|m| m.sender_id != own_account_id && m.has_attachment)
        .map(|m| m.attachment_kind.as_deref().unwrap_or(""))
    {
        if VOICE_ATTACHMENT_KINDS.contains(&kind) {
            return format!("Voice chat {stamp}");
        }
        return format!("Media {stamp}");
    }

    format!("Chat {stamp}")
}

#[cfg(test)]
mod tests {
    use super::{MAX_TITLE_CHARS, derive_title};
    use crate::autothread::detector::ThreadMessage;
    use chrono::{Local, TimeZone};

    const OWN_ID: i64 = 7_000_001;
    const USER_ID: i64 = 42;

    fn text_msg(sender_id: i64, timestamp: i64, text: &str) -> ThreadMessage {
        ThreadMessage {
            sender_id,
            timestamp,
            text: text.to_string(),
            has_attachment: false,
            attachment_kind: None,
        }
    }

    fn media_msg(sender_id: i64, timestamp: i64, kind: &str) -> ThreadMessage {
        ThreadMessage {
            sender_id,
            timestamp,
            text: String::new(),
            has_attachment: true,
            attachment_kind: Some(kind.to_string()),
        }
    }

    fn fixed_now() -> chrono::DateTime<Local> {
        Local.with_ymd_and_hms(2026, 8, 21, 14, 5, 0).unwrap()
    }

    #[test]
    fn long_question_is_cut_at_the_limit_with_ellipsis() {
        let messages = vec![
            text_msg(OWN_ID, 100, "👋 What's on your mind?"),
            text_msg(USER_ID, 140, "what's the best way to cache DNS lookups?"),
        ];
        let first = derive_title(&messages, OWN_ID, fixed_now());
        let second = derive_title(&messages, OWN_ID, fixed_now());

        assert_eq!(first, second);
        assert!(first.starts_with("what's the best way to cache DNS"));
        assert!(first.ends_with('…'));
        assert_eq!(first.chars().count(), MAX_TITLE_CHARS + 1);
    }

    #[test]
    fn filler_messages_are_skipped() {
        let messages = vec![
            text_msg(OWN_ID, 100, "👋 What's on your mind?"),
            text_msg(USER_ID, 110, "hi"),
            text_msg(USER_ID, 120, "how do I rotate logs?"),
        ];
        assert_eq!(
            derive_title(&messages, OWN_ID, fixed_now()),
            "how do I rotate logs?"
        );
    }

    #[test]
    fn any_question_beats_an_earlier_statement() {
        let messages = vec![
            text_msg(OWN_ID, 100, "👋 What's on your mind?"),
            text_msg(USER_ID, 110, "the deploy pipeline is broken again"),
            text_msg(USER_ID, 120, "can you check?"),
        ];
        assert_eq!(derive_title(&messages, OWN_ID, fixed_now()), "can you check?");
    }

    #[test]
    fn substantial_statement_is_used_when_nobody_asked() {
        let messages = vec![
            text_msg(OWN_ID, 100, "👋 What's on your mind?"),
            text_msg(USER_ID, 110, "the builds keep failing on arm64"),
        ];
        assert_eq!(
            derive_title(&messages, OWN_ID, fixed_now()),
            "the builds keep failing on arm64"
        );
    }

    #[test]
    fn statement_is_cut_at_the_first_sentence() {
        let messages = vec![
            text_msg(OWN_ID, 100, "👋 What's on your mind?"),
            text_msg(USER_ID, 110, "Upgraded the runner. It still fails."),
        ];
        assert_eq!(
            derive_title(&messages, OWN_ID, fixed_now()),
            "Upgraded the runner"
        );
    }

    #[test]
    fn bold_label_in_own_message_is_used_when_users_said_nothing_usable() {
        let messages = vec![
            text_msg(OWN_ID, 100, "👋 What's on your mind?"),
            text_msg(USER_ID, 110, "ok"),
            text_msg(OWN_ID, 120, "Here is the **Build report** for today"),
        ];
        assert_eq!(derive_title(&messages, OWN_ID, fixed_now()), "Build report");
    }

    #[test]
    fn colon_label_in_own_message_is_used_as_fallback() {
        let messages = vec![
            text_msg(OWN_ID, 100, "👋 What's on your mind?"),
            text_msg(USER_ID, 110, "yes"),
            text_msg(OWN_ID, 120, "Incident summary: db failover at 03:12"),
        ];
        assert_eq!(
            derive_title(&messages, OWN_ID, fixed_now()),
            "Incident summary"
        );
    }

    #[test]
    fn bold_label_on_a_later_line_is_still_found() {
        let messages = vec![
            text_msg(OWN_ID, 100, "👋 What's on your mind?"),
            text_msg(USER_ID, 110, "ok"),
            text_msg(OWN_ID, 120, "New request\n**Billing dispute**\nstatus: open"),
        ];
        assert_eq!(
            derive_title(&messages, OWN_ID, fixed_now()),
            "Billing dispute"
        );
    }

    #[test]
    fn voice_attachment_gets_a_voice_chat_title() {
        let messages = vec![
            text_msg(OWN_ID, 100, "👋 What's on your mind?"),
            media_msg(USER_ID, 110, "voice"),
        ];
        assert_eq!(
            derive_title(&messages, OWN_ID, fixed_now()),
            "Voice chat Aug 21 14:05"
        );
    }

    #[test]
    fn photo_attachment_gets_a_media_title() {
        let messages = vec![
            text_msg(OWN_ID, 100, "👋 What's on your mind?"),
            media_msg(USER_ID, 110, "photo"),
        ];
        assert_eq!(derive_title(&messages, OWN_ID, fixed_now()), "Media Aug 21 14:05");
    }

    #[test]
    fn empty_exchange_falls_back_to_a_timestamp() {
        assert_eq!(derive_title(&[], OWN_ID, fixed_now()), "Chat Aug 21 14:05");
    }
}
