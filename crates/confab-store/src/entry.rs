// Copyright (c) 2025-2026 Confab Contributors
//
// SPDX-License-Identifier: MIT
//! The conversation log element.
//!
//! Every entry records who posted it (`pubkey`) and, when it belongs to a
//! reason-act-loop, the loop number.  Tool entries always belong to a loop;
//! text entries may be out-of-band (a user message arriving from the
//! transport has no loop).

use confab_model::{ToolCallPart, ToolResultPart};

/// Literal prefix identifying a delegation-completion report.  The view
/// builder keeps only the latest such entry per (agent, loop).
pub const DELEGATION_COMPLETED_MARKER: &str = "# DELEGATION COMPLETED";

/// Substring carried by every synthetic tool result standing in for a call
/// whose real result never arrived.
pub const INTERRUPTED_MARKER: &str = "interrupted";

/// One unit in the conversation log.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Text(TextEntry),
    ToolCall(ToolCallEntry),
    ToolResult(ToolResultEntry),
}

/// Plain text posted by a user, an agent, or a consumed injection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextEntry {
    pub pubkey: String,
    pub content: String,
    /// Loop this text belongs to; `None` for out-of-band messages.
    pub ral: Option<u64>,
    pub event_id: Option<String>,
    /// Unix seconds.
    pub timestamp: Option<i64>,
    /// Explicit recipient list; `None` means broadcast.
    pub targeted_pubkeys: Option<Vec<String>>,
    /// Attribution override: the party this text speaks for, when it differs
    /// from the posting pubkey (an injection attributed to someone else).
    pub sender_pubkey: Option<String>,
}

/// One or more tool invocations requested by an agent's loop turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallEntry {
    pub pubkey: String,
    pub ral: u64,
    pub calls: Vec<ToolCallPart>,
    pub event_id: Option<String>,
    pub timestamp: Option<i64>,
}

/// The outputs answering a prior [`ToolCallEntry`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResultEntry {
    pub pubkey: String,
    pub ral: u64,
    pub results: Vec<ToolResultPart>,
    pub event_id: Option<String>,
    pub timestamp: Option<i64>,
}

impl TextEntry {
    pub fn new(pubkey: impl Into<String>, content: impl Into<String>) -> Self {
        Self { pubkey: pubkey.into(), content: content.into(), ..Self::default() }
    }

    /// True when the content opens with the delegation-completion marker.
    pub fn is_delegation_completion(&self) -> bool {
        self.content.starts_with(DELEGATION_COMPLETED_MARKER)
    }

    /// The pubkey this text is attributed to: the explicit attribution
    /// override when present, otherwise the posting pubkey.
    pub fn effective_sender(&self) -> &str {
        self.sender_pubkey.as_deref().unwrap_or(&self.pubkey)
    }
}

impl Entry {
    /// The posting pubkey.
    pub fn pubkey(&self) -> &str {
        match self {
            Entry::Text(t) => &t.pubkey,
            Entry::ToolCall(c) => &c.pubkey,
            Entry::ToolResult(r) => &r.pubkey,
        }
    }

    /// The loop number, if this entry belongs to one.
    pub fn ral(&self) -> Option<u64> {
        match self {
            Entry::Text(t) => t.ral,
            Entry::ToolCall(c) => Some(c.ral),
            Entry::ToolResult(r) => Some(r.ral),
        }
    }

    pub fn event_id(&self) -> Option<&str> {
        match self {
            Entry::Text(t) => t.event_id.as_deref(),
            Entry::ToolCall(c) => c.event_id.as_deref(),
            Entry::ToolResult(r) => r.event_id.as_deref(),
        }
    }

    pub fn set_event_id(&mut self, id: impl Into<String>) {
        let id = Some(id.into());
        match self {
            Entry::Text(t) => t.event_id = id,
            Entry::ToolCall(c) => c.event_id = id,
            Entry::ToolResult(r) => r.event_id = id,
        }
    }

    /// Unix-seconds timestamp, if known.
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            Entry::Text(t) => t.timestamp,
            Entry::ToolCall(c) => c.timestamp,
            Entry::ToolResult(r) => r.timestamp,
        }
    }

    pub fn as_text(&self) -> Option<&TextEntry> {
        match self {
            Entry::Text(t) => Some(t),
            _ => None,
        }
    }

    /// All call ids carried by this entry (empty for text).
    pub fn call_ids(&self) -> Vec<&str> {
        match self {
            Entry::Text(_) => vec![],
            Entry::ToolCall(c) => c.calls.iter().map(|p| p.id.as_str()).collect(),
            Entry::ToolResult(r) => r.results.iter().map(|p| p.id.as_str()).collect(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
