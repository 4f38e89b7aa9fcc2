// Copyright (c) 2025-2026 Confab Contributors
//
// SPDX-License-Identifier: MIT
//! Per-viewer message view construction.
//!
//! Given the log and the loop tracker, [`ViewBuilder`] materializes the
//! transcript as one agent's loop perceives it: other live loops of the
//! same agent are hidden, other agents' tool traffic is hidden, user-role
//! texts gain attribution prefixes, image URLs in the latest user message
//! expand to multimodal parts, and the output always satisfies the two
//! adjacency rules downstream LLM APIs enforce: every tool call is
//! immediately followed by its result, and every call has one.

mod images;
mod summary;

pub use summary::summarize_ral;

use std::collections::{HashSet, VecDeque};

use tracing::warn;

use confab_model::{ChatMessage, ContentPart, MessageBody, PubkeyNamer, Role, ToolResultPart};

use crate::entry::{Entry, TextEntry};
use crate::ral::RalTracker;

/// Text carried by a synthetic result standing in for a call that was
/// aborted before completing.  Contains the `interrupted` marker verbatim.
const INTERRUPTED_RESULT_TEXT: &str =
    "Tool execution was interrupted before a result was recorded.";

/// Builds LLM-ready message sequences for one (viewer, loop) pair.
pub struct ViewBuilder<'a> {
    entries: &'a [Entry],
    rals: &'a RalTracker,
    known_agents: &'a HashSet<String>,
    namer: &'a dyn PubkeyNamer,
}

impl<'a> ViewBuilder<'a> {
    pub fn new(
        entries: &'a [Entry],
        rals: &'a RalTracker,
        known_agents: &'a HashSet<String>,
        namer: &'a dyn PubkeyNamer,
    ) -> Self {
        Self { entries, rals, known_agents, namer }
    }

    /// The full view for `viewer`'s loop `viewing_ral`.
    pub async fn build(&self, viewer: &str, viewing_ral: u64) -> Vec<ChatMessage> {
        self.build_from(viewer, viewing_ral, 0).await
    }

    /// Like [`build`](Self::build) but over entries at indices strictly
    /// greater than `after_index`, for appending recent activity without
    /// resending history.
    pub async fn build_after(
        &self,
        viewer: &str,
        viewing_ral: u64,
        after_index: usize,
    ) -> Vec<ChatMessage> {
        self.build_from(viewer, viewing_ral, after_index + 1).await
    }

    async fn build_from(&self, viewer: &str, viewing_ral: u64, start: usize) -> Vec<ChatMessage> {
        let folded_out = self.superseded_completions(start);

        let mut out: Vec<ChatMessage> = Vec::new();
        // Call ids emitted but not yet answered in `out`, with tool names.
        let mut pending: Vec<(String, String)> = Vec::new();
        // Messages deferred while a tool exchange is open.
        let mut held: VecDeque<ChatMessage> = VecDeque::new();

        for (index, entry) in self.entries.iter().enumerate().skip(start) {
            if !self.is_visible(entry, viewer, viewing_ral) {
                continue;
            }
            if folded_out.contains(&index) {
                continue;
            }

            match entry {
                Entry::ToolCall(call) => {
                    let msg = ChatMessage::tool_calls(call.calls.clone());
                    if pending.is_empty() {
                        open_exchange(&mut out, &mut pending, msg);
                    } else {
                        held.push_back(msg);
                    }
                }
                Entry::ToolResult(result) => {
                    let msg = ChatMessage::tool_results(result.results.clone());
                    let answers_pending = result
                        .results
                        .iter()
                        .any(|p| pending.iter().any(|(id, _)| id == &p.id));
                    if answers_pending {
                        settle(&mut pending, &msg);
                        out.push(msg);
                        if pending.is_empty() {
                            flush_held(&mut out, &mut held, &mut pending);
                        }
                    } else if pending.is_empty() {
                        warn!(
                            call_ids = ?entry.call_ids(),
                            "tool result without a preceding call; emitting in place"
                        );
                        out.push(msg);
                    } else {
                        held.push_back(msg);
                    }
                }
                Entry::Text(text) => {
                    let msg = self.text_message(text, viewer).await;
                    if pending.is_empty() {
                        out.push(msg);
                    } else {
                        held.push_back(msg);
                    }
                }
            }
        }

        // Wind down: synthesize results for calls that never got one, then
        // drain the holding buffer (which may itself re-open exchanges).
        loop {
            flush_held(&mut out, &mut held, &mut pending);
            if pending.is_empty() && held.is_empty() {
                break;
            }
            if !pending.is_empty() {
                synthesize_results(&mut out, &mut pending);
            }
        }

        expand_latest_user_images(&mut out);
        out
    }

    /// Visibility rules, in priority order.
    fn is_visible(&self, entry: &Entry, viewer: &str, viewing_ral: u64) -> bool {
        let Some(ral) = entry.ral() else {
            // Out-of-band text: a user message or a consumed injection.
            return true;
        };
        if entry.pubkey() == viewer {
            if ral == viewing_ral {
                return true;
            }
            // Another live loop of the same agent must not leak; completed
            // loops are the agent's own history and stay visible.
            return !self.rals.is_active(viewer, ral);
        }
        match entry {
            Entry::Text(t) => !t.content.is_empty(),
            _ => false,
        }
    }

    async fn text_message(&self, text: &TextEntry, viewer: &str) -> ChatMessage {
        if text.pubkey == viewer {
            return ChatMessage::assistant(text.content.clone());
        }
        let prefix = self.user_prefix(text, viewer).await;
        ChatMessage::user(format!("{prefix}{}", text.content))
    }

    /// Attribution prefix for a user-role text; first matching rule wins.
    async fn user_prefix(&self, text: &TextEntry, viewer: &str) -> String {
        let sender = text.effective_sender();
        if sender == viewer {
            return String::new();
        }
        if let Some(targets) = &text.targeted_pubkeys {
            if !targets.is_empty() && !targets.iter().any(|t| t == viewer) {
                // The viewer observes a message addressed elsewhere.
                let sender_name = self.namer.name(sender).await;
                let mut recipients = Vec::with_capacity(targets.len());
                for target in targets {
                    recipients.push(format!("@{}", self.namer.name(target).await));
                }
                return format!("[@{} -> {}] ", sender_name, recipients.join(", "));
            }
        }
        if self.known_agents.contains(sender) {
            return format!("[@{}] ", self.namer.name(sender).await);
        }
        String::new()
    }

    /// Indices of delegation-completion texts superseded by a later one for
    /// the same (agent, loop).
    fn superseded_completions(&self, start: usize) -> HashSet<usize> {
        let mut latest: std::collections::HashMap<(&str, Option<u64>), usize> =
            std::collections::HashMap::new();
        let mut all: Vec<((&str, Option<u64>), usize)> = Vec::new();
        for (index, entry) in self.entries.iter().enumerate().skip(start) {
            if let Entry::Text(t) = entry {
                if t.is_delegation_completion() {
                    let key = (t.pubkey.as_str(), t.ral);
                    latest.insert(key, index);
                    all.push((key, index));
                }
            }
        }
        all.into_iter()
            .filter(|(key, index)| latest.get(key) != Some(index))
            .map(|(_, index)| index)
            .collect()
    }
}

/// Emit a tool-call message and record its call ids as pending.
fn open_exchange(out: &mut Vec<ChatMessage>, pending: &mut Vec<(String, String)>, msg: ChatMessage) {
    if let MessageBody::ToolCalls(parts) = &msg.body {
        pending.extend(parts.iter().map(|p| (p.id.clone(), p.name.clone())));
    }
    out.push(msg);
}

/// Remove from `pending` every call id answered by `msg`.
fn settle(pending: &mut Vec<(String, String)>, msg: &ChatMessage) {
    if let MessageBody::ToolResults(parts) = &msg.body {
        pending.retain(|(id, _)| !parts.iter().any(|p| &p.id == id));
    }
}

/// Drain the holding buffer.
///
/// With no exchange open, messages leave in deferral order; a deferred
/// tool-call re-opens an exchange, after which only results answering it
/// may leave the buffer until it settles.
fn flush_held(
    out: &mut Vec<ChatMessage>,
    held: &mut VecDeque<ChatMessage>,
    pending: &mut Vec<(String, String)>,
) {
    while !held.is_empty() {
        if pending.is_empty() {
            let msg = held.pop_front().expect("held is non-empty");
            if matches!(msg.body, MessageBody::ToolCalls(_)) {
                open_exchange(out, pending, msg);
                continue;
            }
            out.push(msg);
        } else {
            let answer = held.iter().position(|m| match &m.body {
                MessageBody::ToolResults(parts) => {
                    parts.iter().any(|p| pending.iter().any(|(id, _)| id == &p.id))
                }
                _ => false,
            });
            match answer {
                Some(pos) => {
                    let msg = held.remove(pos).expect("position is in range");
                    settle(pending, &msg);
                    out.push(msg);
                }
                None => break,
            }
        }
    }
}

/// Append one synthetic tool-result message answering every pending call.
fn synthesize_results(out: &mut Vec<ChatMessage>, pending: &mut Vec<(String, String)>) {
    let parts: Vec<ToolResultPart> = pending
        .drain(..)
        .map(|(id, name)| ToolResultPart::text(id, name, INTERRUPTED_RESULT_TEXT))
        .collect();
    out.push(ChatMessage::tool_results(parts));
}

/// Expand image URLs in the most recent user-role text message into
/// multimodal parts.  Earlier user messages keep their URLs as plain text
/// to bound fetch cost and preserve provider-side prompt caching.
fn expand_latest_user_images(out: &mut [ChatMessage]) {
    let Some(index) = out
        .iter()
        .rposition(|m| m.role == Role::User && matches!(m.body, MessageBody::Text(_)))
    else {
        return;
    };
    let MessageBody::Text(text) = &out[index].body else {
        return;
    };
    let urls = images::extract_image_urls(text);
    if urls.is_empty() {
        return;
    }
    let mut parts = vec![ContentPart::text(text.clone())];
    parts.extend(urls.into_iter().map(ContentPart::image));
    out[index].body = MessageBody::Parts(parts);
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
