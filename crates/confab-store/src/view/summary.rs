// Copyright (c) 2025-2026 Confab Contributors
//
// SPDX-License-Identifier: MIT
//! Plain-text digest of a concurrent loop.
//!
//! When an agent starts a new loop while another of its loops is still
//! running, the caller may ask for a human-readable description of the
//! other loop to include as context.  The format is deterministic so it
//! can be cached and diffed.

use confab_model::ToolOutput;

use crate::entry::Entry;

/// Tool whose structured results carry delegated-conversation handles worth
/// surfacing in the digest.
const DELEGATE_TOOL: &str = "delegate";

/// Describe the entries of `agent`'s loop `ral` as plain text.
pub fn summarize_ral(entries: &[Entry], agent: &str, ral: u64) -> String {
    let mut lines = vec![
        format!("You have another reason-act-loop (#{ral}) executing:"),
        String::new(),
    ];

    for entry in entries {
        if entry.pubkey() != agent || entry.ral() != Some(ral) {
            continue;
        }
        match entry {
            Entry::Text(t) => lines.push(format!("[text-output] {}", t.content)),
            Entry::ToolCall(c) => {
                for part in &c.calls {
                    lines.push(format!("[tool {}] {}", part.name, render_args(&part.input)));
                }
            }
            Entry::ToolResult(r) => {
                for part in &r.results {
                    if part.name != DELEGATE_TOOL {
                        continue;
                    }
                    if let Some(line) = render_delegate_result(&part.output) {
                        lines.push(line);
                    }
                }
            }
        }
    }

    lines.join("\n")
}

/// Render a tool-call argument map as `k1="v1", k2=3, …` in insertion order.
fn render_args(input: &serde_json::Map<String, serde_json::Value>) -> String {
    input
        .iter()
        .map(|(k, v)| {
            let rendered = serde_json::to_string(v).unwrap_or_else(|_| "null".to_string());
            format!("{k}={rendered}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `[delegate result] delegationConversationIds: <who>: <id>, …` for a
/// structured delegate output carrying `pendingDelegations`.
fn render_delegate_result(output: &ToolOutput) -> Option<String> {
    let ToolOutput::Json(value) = output else {
        return None;
    };
    let pending = value.get("pendingDelegations")?.as_object()?;
    if pending.is_empty() {
        return None;
    }
    let items = pending
        .iter()
        .map(|(who, id)| {
            let id = id.as_str().map(str::to_string).unwrap_or_else(|| id.to_string());
            format!("{who}: {id}")
        })
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!("[delegate result] delegationConversationIds: {items}"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
