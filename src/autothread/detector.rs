/// One message fetched from a thread for a single tick. Held in memory only;
/// nothing here is ever persisted.
#[derive(Debug, Clone)]
pub struct ThreadMessage {
    pub sender_id: i64,
    /// Epoch seconds of the message send time.
    pub timestamp: i64,
    pub text: String,
    pub has_attachment: bool,
    pub attachment_kind: Option<String>,
}

/// A message counts as user participation when somebody other than our own
/// account sent it and it carries content (non-blank text or an attachment).
pub fn is_user_message(message: &ThreadMessage, own_account_id: i64) -> bool {
    message.sender_id != own_account_id
        && (!message.text.trim().is_empty() || message.has_attachment)
}

/// A thread holds a genuine exchange only when both sides spoke and the user
/// replied after our earliest message. Service noise ahead of the welcome
/// must not trigger an archive.
pub fn is_conversation(messages: &[ThreadMessage], own_account_id: i64) -> bool {
    if messages.len() < 2 {
        return false;
    }
    let Some(first_own_ts) = messages
        .iter()
        .filter(|m| m.sender_id == own_account_id)
        .map(|m| m.timestamp)
        .min()
    else {
        return false;
    };
    messages
        .iter()
        .any(|m| is_user_message(m, own_account_id) && m.timestamp > first_own_ts)
}

#[cfg(test)]
mod tests {
    use super::{ThreadMessage, is_conversation, is_user_message};

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

    #[test]
    fn welcome_alone_is_not_a_conversation() {
        let messages = vec![text_msg(OWN_ID, 100, "👋 What's on your mind?")];
        assert!(!is_conversation(&messages, OWN_ID));
    }

    #[test]
    fn user_reply_after_welcome_is_a_conversation() {
        let messages = vec![
            text_msg(OWN_ID, 100, "👋 What's on your mind?"),
            text_msg(USER_ID, 140, "can you look at the deploy?"),
        ];
        assert!(is_conversation(&messages, OWN_ID));
    }

    #[test]
    fn user_message_only_before_welcome_is_not_a_conversation() {
        let messages = vec![
            text_msg(USER_ID, 90, "hello?"),
            text_msg(OWN_ID, 100, "👋 What's on your mind?"),
        ];
        assert!(!is_conversation(&messages, OWN_ID));
    }

    #[test]
    fn two_own_messages_are_not_a_conversation() {
        let messages = vec![
            text_msg(OWN_ID, 100, "👋 What's on your mind?"),
            text_msg(OWN_ID, 160, "still here if you need anything"),
        ];
        assert!(!is_conversation(&messages, OWN_ID));
    }

    #[test]
    fn users_talking_without_us_are_not_a_conversation() {
        let messages = vec![
            text_msg(USER_ID, 100, "anyone around?"),
            text_msg(43, 110, "yeah what's up"),
        ];
        assert!(!is_conversation(&messages, OWN_ID));
    }

    #[test]
    fn blank_user_text_does_not_count_as_participation() {
        let blank = text_msg(USER_ID, 140, "   ");
        assert!(!is_user_message(&blank, OWN_ID));

        let messages = vec![text_msg(OWN_ID, 100, "welcome"), blank];
        assert!(!is_conversation(&messages, OWN_ID));
    }

    #[test]
    fn attachment_only_reply_counts_as_participation() {
        let messages = vec![
            text_msg(OWN_ID, 100, "welcome"),
            media_msg(USER_ID, 150, "voice"),
        ];
        assert!(is_conversation(&messages, OWN_ID));
    }
}
