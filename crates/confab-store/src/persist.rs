// Copyright (c) 2025-2026 Confab Contributors
//
// SPDX-License-Identifier: MIT
//! On-disk snapshot schema.
//!
//! One JSON object per conversation under
//! `<base>/projects/<projectId>/conversations/<conversationId>.json`.
//! Loading is tolerant: missing top-level keys default to empty
//! collections, unparseable entries are skipped with a warning.  Saving is
//! strict; every field is written.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use confab_model::{ToolCallPart, ToolResultPart};

use crate::entry::{Entry, TextEntry, ToolCallEntry, ToolResultEntry};
use crate::injection::{DeferredInjection, InjectionRole, RalInjection};
use crate::store::{ActiveRalMap, ExecutionTime, Metadata, NextRalMap};

const TYPE_TEXT: &str = "text";
const TYPE_TOOL_CALL: &str = "tool-call";
const TYPE_TOOL_RESULT: &str = "tool-result";

/// Everything a snapshot carries, in memory form.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub next: NextRalMap,
    pub active: ActiveRalMap,
    pub ral_injections: Vec<RalInjection>,
    pub deferred: Vec<DeferredInjection>,
    pub entries: Vec<Entry>,
    pub metadata: Metadata,
    pub agent_todos: HashMap<String, Vec<Value>>,
    pub todo_nudged: HashSet<String>,
    pub blocked_agents: HashSet<String>,
    pub execution_time: ExecutionTime,
    pub sessions_by_phase: HashMap<String, HashMap<String, String>>,
}

/// The serialized form of a conversation.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct ConversationFile {
    active_ral: NextToActive,
    next_ral_number: HashMap<String, u64>,
    injections: Vec<RalInjectionRecord>,
    deferred_injections: Vec<DeferredInjectionRecord>,
    messages: Vec<EntryRecord>,
    metadata: Metadata,
    agent_todos: HashMap<String, Vec<Value>>,
    todo_nudged_agents: Vec<String>,
    blocked_agents: Vec<String>,
    execution_time: ExecutionTime,
    agent_sessions_by_phase: HashMap<String, HashMap<String, String>>,
}

type NextToActive = HashMap<String, Vec<RalId>>;

/// Active loops serialize as `{"id": n}` objects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RalId {
    id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RalInjectionRecord {
    target_ral: TargetRal,
    role: InjectionRole,
    content: String,
    queued_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetRal {
    pubkey: String,
    ral: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeferredInjectionRecord {
    target_pubkey: String,
    role: InjectionRole,
    content: String,
    queued_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryRecord {
    pubkey: String,
    #[serde(default)]
    content: String,
    message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ral: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    targeted_pubkeys: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sender_pubkey: Option<String>,
}

impl ConversationFile {
    pub(crate) fn from_state(state: StoreState) -> Self {
        let active_ral = state
            .active
            .iter()
            .map(|(agent, set)| {
                (agent.clone(), set.iter().map(|n| RalId { id: *n }).collect::<Vec<_>>())
            })
            .collect();
        let next_ral_number = state.next.iter().map(|(a, n)| (a.clone(), *n)).collect();

        let mut todo_nudged_agents: Vec<String> = state.todo_nudged.into_iter().collect();
        todo_nudged_agents.sort();
        let mut blocked_agents: Vec<String> = state.blocked_agents.into_iter().collect();
        blocked_agents.sort();

        Self {
            active_ral,
            next_ral_number,
            injections: state.ral_injections.into_iter().map(RalInjectionRecord::from).collect(),
            deferred_injections: state
                .deferred
                .into_iter()
                .map(DeferredInjectionRecord::from)
                .collect(),
            messages: state.entries.iter().map(EntryRecord::from).collect(),
            metadata: state.metadata,
            agent_todos: state.agent_todos,
            todo_nudged_agents,
            blocked_agents,
            execution_time: state.execution_time,
            agent_sessions_by_phase: state.sessions_by_phase,
        }
    }

    pub(crate) fn into_state(self) -> StoreState {
        let active: ActiveRalMap = self
            .active_ral
            .into_iter()
            .map(|(agent, ids)| (agent, ids.into_iter().map(|r| r.id).collect()))
            .collect();
        let next: NextRalMap = self.next_ral_number.into_iter().collect();

        StoreState {
            next,
            active,
            ral_injections: self.injections.into_iter().map(RalInjection::from).collect(),
            deferred: self
                .deferred_injections
                .into_iter()
                .map(DeferredInjection::from)
                .collect(),
            entries: self.messages.into_iter().filter_map(|r| r.into_entry()).collect(),
            metadata: self.metadata,
            agent_todos: self.agent_todos,
            todo_nudged: self.todo_nudged_agents.into_iter().collect(),
            blocked_agents: self.blocked_agents.into_iter().collect(),
            execution_time: self.execution_time,
            sessions_by_phase: self.agent_sessions_by_phase,
        }
    }

    /// True when the snapshot has no transcript.
    pub(crate) fn has_history(&self) -> bool {
        !self.messages.is_empty()
    }
}

impl From<RalInjection> for RalInjectionRecord {
    fn from(i: RalInjection) -> Self {
        Self {
            target_ral: TargetRal { pubkey: i.pubkey, ral: i.ral },
            role: i.role,
            content: i.content,
            queued_at: i.queued_at,
        }
    }
}

impl From<RalInjectionRecord> for RalInjection {
    fn from(r: RalInjectionRecord) -> Self {
        Self {
            pubkey: r.target_ral.pubkey,
            ral: r.target_ral.ral,
            role: r.role,
            content: r.content,
            queued_at: r.queued_at,
        }
    }
}

impl From<DeferredInjection> for DeferredInjectionRecord {
    fn from(i: DeferredInjection) -> Self {
        Self {
            target_pubkey: i.pubkey,
            role: i.role,
            content: i.content,
            queued_at: i.queued_at,
            source: i.source,
        }
    }
}

impl From<DeferredInjectionRecord> for DeferredInjection {
    fn from(r: DeferredInjectionRecord) -> Self {
        Self {
            pubkey: r.target_pubkey,
            role: r.role,
            content: r.content,
            queued_at: r.queued_at,
            source: r.source,
        }
    }
}

impl From<&Entry> for EntryRecord {
    fn from(entry: &Entry) -> Self {
        match entry {
            Entry::Text(t) => Self {
                pubkey: t.pubkey.clone(),
                content: t.content.clone(),
                message_type: TYPE_TEXT.to_string(),
                ral: t.ral,
                tool_data: None,
                event_id: t.event_id.clone(),
                timestamp: t.timestamp,
                targeted_pubkeys: t.targeted_pubkeys.clone(),
                sender_pubkey: t.sender_pubkey.clone(),
            },
            Entry::ToolCall(c) => Self {
                pubkey: c.pubkey.clone(),
                content: String::new(),
                message_type: TYPE_TOOL_CALL.to_string(),
                ral: Some(c.ral),
                tool_data: serde_json::to_value(&c.calls).ok(),
                event_id: c.event_id.clone(),
                timestamp: c.timestamp,
                targeted_pubkeys: None,
                sender_pubkey: None,
            },
            Entry::ToolResult(r) => Self {
                pubkey: r.pubkey.clone(),
                content: String::new(),
                message_type: TYPE_TOOL_RESULT.to_string(),
                ral: Some(r.ral),
                tool_data: serde_json::to_value(&r.results).ok(),
                event_id: r.event_id.clone(),
                timestamp: r.timestamp,
                targeted_pubkeys: None,
                sender_pubkey: None,
            },
        }
    }
}

impl EntryRecord {
    /// Parse back into an entry.  Malformed records are dropped with a
    /// warning rather than failing the whole load.
    fn into_entry(self) -> Option<Entry> {
        match self.message_type.as_str() {
            TYPE_TEXT => Some(Entry::Text(TextEntry {
                pubkey: self.pubkey,
                content: self.content,
                ral: self.ral,
                event_id: self.event_id,
                timestamp: self.timestamp,
                targeted_pubkeys: self.targeted_pubkeys,
                sender_pubkey: self.sender_pubkey,
            })),
            TYPE_TOOL_CALL => {
                let ral = self.ral?;
                let calls: Vec<ToolCallPart> = self
                    .tool_data
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default();
                if calls.is_empty() {
                    warn!(pubkey = %self.pubkey, "tool-call record without parsable parts; dropped");
                    return None;
                }
                Some(Entry::ToolCall(ToolCallEntry {
                    pubkey: self.pubkey,
                    ral,
                    calls,
                    event_id: self.event_id,
                    timestamp: self.timestamp,
                }))
            }
            TYPE_TOOL_RESULT => {
                let ral = self.ral?;
                let results: Vec<ToolResultPart> = self
                    .tool_data
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default();
                if results.is_empty() {
                    warn!(pubkey = %self.pubkey, "tool-result record without parsable parts; dropped");
                    return None;
                }
                Some(Entry::ToolResult(ToolResultEntry {
                    pubkey: self.pubkey,
                    ral,
                    results,
                    event_id: self.event_id,
                    timestamp: self.timestamp,
                }))
            }
            other => {
                warn!(message_type = other, "unknown message type in snapshot; dropped");
                None
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_loads_with_defaults() {
        let file: ConversationFile = serde_json::from_str("{}").unwrap();
        let state = file.into_state();
        assert!(state.entries.is_empty());
        assert!(state.next.is_empty());
        assert!(state.ral_injections.is_empty());
        assert_eq!(state.execution_time, ExecutionTime::default());
    }

    #[test]
    fn entry_record_uses_camel_case_keys() {
        let mut t = TextEntry::new("pk", "hi");
        t.event_id = Some("ev1".into());
        t.targeted_pubkeys = Some(vec!["a".into()]);
        let record = EntryRecord::from(&Entry::Text(t));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["messageType"], json!("text"));
        assert_eq!(json["eventId"], json!("ev1"));
        assert_eq!(json["targetedPubkeys"], json!(["a"]));
        assert!(json.get("toolData").is_none());
    }

    #[test]
    fn tool_call_record_round_trips() {
        let entry = Entry::ToolCall(ToolCallEntry {
            pubkey: "agent".into(),
            ral: 2,
            calls: vec![ToolCallPart::new("c1", "bash").with_arg("cmd", json!("ls"))],
            event_id: None,
            timestamp: Some(99),
        });
        let record = EntryRecord::from(&entry);
        let back = record.into_entry().unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn unknown_message_type_is_dropped() {
        let record = EntryRecord {
            pubkey: "pk".into(),
            content: String::new(),
            message_type: "reaction".into(),
            ral: None,
            tool_data: None,
            event_id: None,
            timestamp: None,
            targeted_pubkeys: None,
            sender_pubkey: None,
        };
        assert!(record.into_entry().is_none());
    }

    #[test]
    fn tool_call_without_tool_data_is_dropped() {
        let record = EntryRecord {
            pubkey: "pk".into(),
            content: String::new(),
            message_type: TYPE_TOOL_CALL.into(),
            ral: Some(1),
            tool_data: None,
            event_id: None,
            timestamp: None,
            targeted_pubkeys: None,
            sender_pubkey: None,
        };
        assert!(record.into_entry().is_none());
    }

    #[test]
    fn active_ral_serialises_as_id_objects() {
        let mut state = StoreState::default();
        state.active.entry("agent".into()).or_default().extend([1u64, 3]);
        state.next.insert("agent".into(), 3);
        let file = ConversationFile::from_state(state);
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["activeRal"]["agent"], json!([{"id": 1}, {"id": 3}]));
        assert_eq!(json["nextRalNumber"]["agent"], json!(3));
    }

    #[test]
    fn injection_records_use_target_ral_shape() {
        let mut state = StoreState::default();
        state.ral_injections.push(RalInjection {
            pubkey: "agent".into(),
            ral: 2,
            role: InjectionRole::User,
            content: "now".into(),
            queued_at: 1234,
        });
        let file = ConversationFile::from_state(state);
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(
            json["injections"][0],
            json!({"targetRal": {"pubkey": "agent", "ral": 2}, "role": "user", "content": "now", "queuedAt": 1234})
        );
    }
}
