use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pointer record for one forum. Kept as an object so the document stays
/// append-tolerant when new per-forum fields arrive.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InboxPointer {
    pub inbox_thread_id: i64,
}

/// Per-forum map of which thread currently serves as the inbox. Keys are the
/// forum chat ids rendered as strings, matching the on-disk document.
///
/// Earlier daemon revisions wrote the forum ids at the top level of the
/// file; this document wraps them in a `forums` map under a
/// `schema_version` envelope. An old flat file is not migrated: its
/// top-level ids read as unknown fields, the state starts empty, and the
/// next `ensure_inbox` re-adopts the open inbox from the platform and
/// rewrites the file in this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForumInboxState {
    pub schema_version: u32,
    pub forums: BTreeMap<String, InboxPointer>,
}

impl Default for ForumInboxState {
    fn default() -> Self {
        Self {
            schema_version: 1,
            forums: BTreeMap::new(),
        }
    }
}

impl ForumInboxState {
    pub fn inbox_for(&self, forum_id: i64) -> Option<i64> {
        self.forums
            .get(&forum_id.to_string())
            .map(|p| p.inbox_thread_id)
    }

    pub fn set_inbox(&mut self, forum_id: i64, thread_id: i64) {
        self.forums.insert(
            forum_id.to_string(),
            InboxPointer {
                inbox_thread_id: thread_id,
            },
        );
    }

    /// Drops the pointer so the next `ensure_inbox` repairs it from the
    /// platform instead of trusting a thread that no longer serves as inbox.
    pub fn clear_inbox(&mut self, forum_id: i64) {
        self.forums.remove(&forum_id.to_string());
    }
}
