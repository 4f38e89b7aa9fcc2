// Copyright (c) 2025-2026 Confab Contributors
//
// SPDX-License-Identifier: MIT
//! Inbound signed events from the publish-subscribe transport.
//!
//! The store does not verify signatures or route events; it only consumes
//! the fields below.  Tags follow the `["p", <pubkey>]` convention for
//! referenced recipients.

use serde::{Deserialize, Serialize};

/// Event kind for plain text notes; the only kind the store appends.
pub const KIND_TEXT: u32 = 1;

/// A signed event as delivered by the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NoteEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl NoteEvent {
    pub fn new(
        id: impl Into<String>,
        pubkey: impl Into<String>,
        kind: u32,
        content: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            pubkey: pubkey.into(),
            created_at,
            kind,
            tags: Vec::new(),
            content: content.into(),
        }
    }

    /// Append a `["p", pubkey]` recipient tag.
    pub fn with_recipient(mut self, pubkey: impl Into<String>) -> Self {
        self.tags.push(vec!["p".to_string(), pubkey.into()]);
        self
    }

    /// Pubkeys referenced through `["p", …]` tags, in tag order.
    pub fn referenced_pubkeys(&self) -> Vec<String> {
        self.tags
            .iter()
            .filter(|t| t.len() >= 2 && t[0] == "p")
            .map(|t| t[1].clone())
            .collect()
    }

    pub fn is_text_note(&self) -> bool {
        self.kind == KIND_TEXT
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referenced_pubkeys_reads_p_tags_in_order() {
        let ev = NoteEvent::new("id1", "author", KIND_TEXT, "hi", 100)
            .with_recipient("aa")
            .with_recipient("bb");
        assert_eq!(ev.referenced_pubkeys(), vec!["aa", "bb"]);
    }

    #[test]
    fn referenced_pubkeys_ignores_other_tags() {
        let mut ev = NoteEvent::new("id1", "author", KIND_TEXT, "hi", 100);
        ev.tags.push(vec!["e".into(), "some-event".into()]);
        ev.tags.push(vec!["p".into(), "aa".into()]);
        ev.tags.push(vec!["p".into()]); // malformed, too short
        assert_eq!(ev.referenced_pubkeys(), vec!["aa"]);
    }

    #[test]
    fn only_kind_one_is_a_text_note() {
        assert!(NoteEvent::new("i", "p", KIND_TEXT, "x", 0).is_text_note());
        assert!(!NoteEvent::new("i", "p", 24133, "x", 0).is_text_note());
    }

    #[test]
    fn event_round_trips_through_json() {
        let ev = NoteEvent::new("id9", "pk", KIND_TEXT, "content", 1700000000)
            .with_recipient("aa");
        let json = serde_json::to_string(&ev).unwrap();
        let back: NoteEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }
}
