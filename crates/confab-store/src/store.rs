// Copyright (c) 2025-2026 Confab Contributors
//
// SPDX-License-Identifier: MIT
//! The per-conversation aggregate.
//!
//! A [`ConversationStore`] owns the entry log, the loop tracker, both
//! injection queues, conversation metadata, and per-agent state, and knows
//! how to snapshot all of it to one JSON file.  Every operation is
//! synchronous except view building (name lookups) and `save`/`load`
//! (file IO); callers serialize access between those await points.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use confab_model::{ChatMessage, PubkeyNamer};

use crate::entry::{Entry, TextEntry};
use crate::error::StoreError;
use crate::event::NoteEvent;
use crate::injection::{DeferredInjection, InjectionQueues, InjectionRole, RalInjection};
use crate::log::{AppendOutcome, EntryLog};
use crate::persist::{ConversationFile, StoreState};
use crate::ral::RalTracker;
use crate::view::{summarize_ral, ViewBuilder};

/// Free-form conversation metadata with recognized fields.
///
/// Unknown keys survive a load/save round-trip through `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_user_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_current_activity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referenced_article: Option<ReferencedArticle>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A read-only article the conversation refers to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReferencedArticle {
    pub title: String,
    pub content: String,
    pub d_tag: String,
}

/// Wall-clock accounting updated by the owning runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionTime {
    pub total_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_session_start: Option<i64>,
    pub is_active: bool,
    pub last_updated: i64,
}

impl ExecutionTime {
    /// Open a work session at `now` (Unix seconds).  No-op when already open.
    pub fn begin_session(&mut self, now: i64) {
        if !self.is_active {
            self.is_active = true;
            self.current_session_start = Some(now);
        }
        self.last_updated = now;
    }

    /// Close the open work session at `now`, folding its duration into the
    /// total.  No-op when no session is open.
    pub fn end_session(&mut self, now: i64) {
        if let Some(start) = self.current_session_start.take() {
            self.total_seconds += (now - start).max(0) as u64;
        }
        self.is_active = false;
        self.last_updated = now;
    }
}

/// All state for one conversation.
#[derive(Debug)]
pub struct ConversationStore {
    conversation_id: String,
    path: PathBuf,
    log: EntryLog,
    rals: RalTracker,
    injections: InjectionQueues,
    metadata: Metadata,
    agent_todos: HashMap<String, Vec<Value>>,
    todo_nudged: HashSet<String>,
    blocked_agents: HashSet<String>,
    sessions_by_phase: HashMap<String, HashMap<String, String>>,
    execution_time: ExecutionTime,
    known_agents: Arc<HashSet<String>>,
}

impl ConversationStore {
    /// Path of the backing snapshot file.
    pub fn snapshot_path(base_dir: &Path, project_id: &str, conversation_id: &str) -> PathBuf {
        base_dir
            .join("projects")
            .join(project_id)
            .join("conversations")
            .join(format!("{conversation_id}.json"))
    }

    /// An empty store that will persist to the standard location.
    pub fn new(
        base_dir: &Path,
        project_id: &str,
        conversation_id: impl Into<String>,
        known_agents: Arc<HashSet<String>>,
    ) -> Self {
        let conversation_id = conversation_id.into();
        let path = Self::snapshot_path(base_dir, project_id, &conversation_id);
        Self {
            conversation_id,
            path,
            log: EntryLog::new(),
            rals: RalTracker::new(),
            injections: InjectionQueues::new(),
            metadata: Metadata::default(),
            agent_todos: HashMap::new(),
            todo_nudged: HashSet::new(),
            blocked_agents: HashSet::new(),
            sessions_by_phase: HashMap::new(),
            execution_time: ExecutionTime::default(),
            known_agents,
        }
    }

    /// Populate a store from its snapshot file, or start empty when the
    /// file does not exist.  A malformed snapshot resets to empty so the
    /// conversation can keep operating.
    pub async fn load(
        base_dir: &Path,
        project_id: &str,
        conversation_id: impl Into<String>,
        known_agents: Arc<HashSet<String>>,
    ) -> Result<Self, StoreError> {
        let mut store = Self::new(base_dir, project_id, conversation_id, known_agents);
        match tokio::fs::read_to_string(&store.path).await {
            Ok(raw) => match serde_json::from_str::<ConversationFile>(&raw) {
                Ok(file) => store.apply_snapshot(file),
                Err(err) => {
                    warn!(
                        path = %store.path.display(),
                        error = %err,
                        "corrupt conversation snapshot; resetting to empty state"
                    );
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(StoreError::SnapshotRead { path: store.path.clone(), source })
            }
        }
        Ok(store)
    }

    /// Write the current state atomically (temp file + rename).
    pub async fn save(&self) -> Result<(), StoreError> {
        let file = self.snapshot();
        let json = serde_json::to_string_pretty(&file).expect("snapshot serializes");

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::SnapshotWrite { path: self.path.clone(), source })?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json.as_bytes())
            .await
            .map_err(|source| StoreError::SnapshotWrite { path: tmp.clone(), source })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| StoreError::SnapshotWrite { path: self.path.clone(), source })?;
        debug!(path = %self.path.display(), "conversation snapshot saved");
        Ok(())
    }

    // ─── Entry ingress ────────────────────────────────────────────────────────

    /// Append an entry, deduplicating by event id.  Tool entries activate
    /// their carried loop so out-of-order delivery cannot orphan them.
    pub fn add_message(&mut self, entry: Entry) -> AppendOutcome {
        match &entry {
            Entry::ToolCall(c) => self.rals.ensure_active(&c.pubkey, c.ral),
            Entry::ToolResult(r) => self.rals.ensure_active(&r.pubkey, r.ral),
            Entry::Text(_) => {}
        }
        self.log.append(entry)
    }

    /// Ingest a transport event.  Only plain text notes (kind 1) are
    /// appended; everything else returns `None` untouched.
    pub fn add_event_message(&mut self, event: &NoteEvent, is_from_agent: bool) -> Option<AppendOutcome> {
        if !event.is_text_note() {
            debug!(kind = event.kind, event_id = %event.id, "ignoring non-text event");
            return None;
        }
        let referenced = event.referenced_pubkeys();
        let entry = TextEntry {
            pubkey: event.pubkey.clone(),
            content: event.content.clone(),
            ral: None,
            event_id: Some(event.id.clone()),
            timestamp: Some(event.created_at),
            targeted_pubkeys: if referenced.is_empty() { None } else { Some(referenced) },
            sender_pubkey: None,
        };
        let outcome = self.log.append(Entry::Text(entry));
        if !is_from_agent && !outcome.is_duplicate() {
            self.metadata.last_user_message = Some(event.content.clone());
        }
        Some(outcome)
    }

    pub fn set_event_id_at(&mut self, index: usize, id: impl Into<String>) {
        self.log.set_event_id_at(index, id);
    }

    pub fn has_event_id(&self, id: &str) -> bool {
        self.log.has_event_id(id)
    }

    pub fn entries(&self) -> &[Entry] {
        self.log.entries()
    }

    pub fn root_event_id(&self) -> Option<&str> {
        self.log.root_event_id()
    }

    /// Timestamp of the newest entry, or 0 for an empty log.
    pub fn last_activity_time(&self) -> i64 {
        self.log.last_activity_time()
    }

    // ─── RAL lifecycle ────────────────────────────────────────────────────────

    pub fn create_ral(&mut self, agent: &str) -> u64 {
        self.rals.create(agent)
    }

    pub fn ensure_ral_active(&mut self, agent: &str, ral: u64) {
        self.rals.ensure_active(agent, ral);
    }

    pub fn complete_ral(&mut self, agent: &str, ral: u64) {
        self.rals.complete(agent, ral);
    }

    pub fn is_ral_active(&self, agent: &str, ral: u64) -> bool {
        self.rals.is_active(agent, ral)
    }

    pub fn active_rals_of(&self, agent: &str) -> Vec<u64> {
        self.rals.active_of(agent)
    }

    pub fn all_active_rals(&self) -> BTreeMap<String, Vec<u64>> {
        self.rals.all_active()
    }

    // ─── Message views ────────────────────────────────────────────────────────

    /// The transcript as `viewer`'s loop `ral` should see it, ready for an
    /// LLM call.
    pub async fn build_messages_for_ral(
        &self,
        namer: &dyn PubkeyNamer,
        viewer: &str,
        ral: u64,
    ) -> Vec<ChatMessage> {
        ViewBuilder::new(self.log.entries(), &self.rals, &self.known_agents, namer)
            .build(viewer, ral)
            .await
    }

    /// Same rules, restricted to entries appended after `after_index`.
    pub async fn build_messages_for_ral_after_index(
        &self,
        namer: &dyn PubkeyNamer,
        viewer: &str,
        ral: u64,
        after_index: usize,
    ) -> Vec<ChatMessage> {
        ViewBuilder::new(self.log.entries(), &self.rals, &self.known_agents, namer)
            .build_after(viewer, ral, after_index)
            .await
    }

    /// Plain-text digest of another loop of the same agent, for callers
    /// that want concurrent-loop context.
    pub fn summarize_other_ral(&self, agent: &str, ral: u64) -> String {
        summarize_ral(self.log.entries(), agent, ral)
    }

    // ─── Injections ───────────────────────────────────────────────────────────

    /// Queue an injection for a specific (agent, loop).
    pub fn add_injection(
        &mut self,
        agent: impl Into<String>,
        ral: u64,
        role: InjectionRole,
        content: impl Into<String>,
    ) {
        self.injections.enqueue_ral(RalInjection {
            pubkey: agent.into(),
            ral,
            role,
            content: content.into(),
            queued_at: Utc::now().timestamp(),
        });
    }

    pub fn get_pending_injections(&self, agent: &str, ral: u64) -> Vec<&RalInjection> {
        self.injections.peek_ral(agent, ral)
    }

    /// Drain injections for (agent, loop), appending each to the log as a
    /// text entry of that loop.  User-role injections are targeted at the
    /// agent; system-role injections are broadcast.
    pub fn consume_injections(&mut self, agent: &str, ral: u64) -> Vec<RalInjection> {
        let drained = self.injections.drain_ral(agent, ral);
        for injection in &drained {
            let entry = TextEntry {
                pubkey: agent.to_string(),
                content: injection.content.clone(),
                ral: Some(ral),
                event_id: None,
                timestamp: Some(injection.queued_at),
                targeted_pubkeys: match injection.role {
                    InjectionRole::User => Some(vec![agent.to_string()]),
                    InjectionRole::System => None,
                },
                sender_pubkey: None,
            };
            self.log.append(Entry::Text(entry));
        }
        drained
    }

    /// Queue an injection for the agent's next loop, whichever that is.
    pub fn add_deferred_injection(
        &mut self,
        agent: impl Into<String>,
        role: InjectionRole,
        content: impl Into<String>,
        source: Option<String>,
    ) {
        self.injections.enqueue_deferred(DeferredInjection {
            pubkey: agent.into(),
            role,
            content: content.into(),
            queued_at: Utc::now().timestamp(),
            source,
        });
    }

    pub fn get_pending_deferred_injections(&self, agent: &str) -> Vec<&DeferredInjection> {
        self.injections.peek_deferred(agent)
    }

    /// Drain deferred injections for `agent`.  No log side effect; the
    /// caller merges them as it sees fit.
    pub fn consume_deferred_injections(&mut self, agent: &str) -> Vec<DeferredInjection> {
        self.injections.drain_deferred(agent)
    }

    // ─── Tool bookkeeping ─────────────────────────────────────────────────────

    pub fn has_tool_call(&self, call_id: &str) -> bool {
        self.log.entries().iter().any(|e| match e {
            Entry::ToolCall(c) => c.calls.iter().any(|p| p.id == call_id),
            _ => false,
        })
    }

    pub fn has_tool_result(&self, call_id: &str) -> bool {
        self.log.entries().iter().any(|e| match e {
            Entry::ToolResult(r) => r.results.iter().any(|p| p.id == call_id),
            _ => false,
        })
    }

    // ─── Metadata ─────────────────────────────────────────────────────────────

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.metadata.title = Some(title.into());
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.title.as_deref()
    }

    /// Set the phase label and stamp `phase_started_at`.
    pub fn set_phase(&mut self, phase: impl Into<String>) {
        self.metadata.phase = Some(phase.into());
        self.metadata.phase_started_at = Some(Utc::now().timestamp());
    }

    /// Merge a JSON object into the metadata.  Null values remove keys;
    /// unknown keys are retained verbatim.
    pub fn update_metadata(&mut self, patch: serde_json::Map<String, Value>) {
        let mut current =
            serde_json::to_value(&self.metadata).unwrap_or(Value::Object(Default::default()));
        if let Value::Object(map) = &mut current {
            for (key, value) in patch {
                if value.is_null() {
                    map.remove(&key);
                } else {
                    map.insert(key, value);
                }
            }
        }
        self.metadata = serde_json::from_value(current).unwrap_or_default();
    }

    // ─── Per-agent state ──────────────────────────────────────────────────────

    pub fn get_todos(&self, agent: &str) -> &[Value] {
        self.agent_todos.get(agent).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set_todos(&mut self, agent: impl Into<String>, todos: Vec<Value>) {
        self.agent_todos.insert(agent.into(), todos);
    }

    pub fn has_been_nudged_about_todos(&self, agent: &str) -> bool {
        self.todo_nudged.contains(agent)
    }

    pub fn set_nudged_about_todos(&mut self, agent: impl Into<String>) {
        self.todo_nudged.insert(agent.into());
    }

    pub fn block_agent(&mut self, agent: impl Into<String>) {
        self.blocked_agents.insert(agent.into());
    }

    pub fn unblock_agent(&mut self, agent: &str) {
        self.blocked_agents.remove(agent);
    }

    pub fn is_agent_blocked(&self, agent: &str) -> bool {
        self.blocked_agents.contains(agent)
    }

    /// Blocked agents, sorted for deterministic output.
    pub fn get_blocked_agents(&self) -> Vec<String> {
        let mut agents: Vec<String> = self.blocked_agents.iter().cloned().collect();
        agents.sort();
        agents
    }

    /// Opaque per-agent session handle for a phase.
    pub fn session_for_phase(&self, agent: &str, phase: &str) -> Option<&str> {
        self.sessions_by_phase.get(agent).and_then(|m| m.get(phase)).map(String::as_str)
    }

    pub fn set_session_for_phase(
        &mut self,
        agent: impl Into<String>,
        phase: impl Into<String>,
        session: impl Into<String>,
    ) {
        self.sessions_by_phase
            .entry(agent.into())
            .or_default()
            .insert(phase.into(), session.into());
    }

    // ─── Execution time ───────────────────────────────────────────────────────

    pub fn execution_time(&self) -> &ExecutionTime {
        &self.execution_time
    }

    pub fn execution_time_mut(&mut self) -> &mut ExecutionTime {
        &mut self.execution_time
    }

    // ─── Snapshot conversion ──────────────────────────────────────────────────

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    fn snapshot(&self) -> ConversationFile {
        let (next, active) = self.rals.parts();
        ConversationFile::from_state(StoreState {
            next: next.clone(),
            active: active.clone(),
            ral_injections: self.injections.ral_targeted().to_vec(),
            deferred: self.injections.deferred().to_vec(),
            entries: self.log.entries().to_vec(),
            metadata: self.metadata.clone(),
            agent_todos: self.agent_todos.clone(),
            todo_nudged: self.todo_nudged.clone(),
            blocked_agents: self.blocked_agents.clone(),
            execution_time: self.execution_time.clone(),
            sessions_by_phase: self.sessions_by_phase.clone(),
        })
    }

    fn apply_snapshot(&mut self, file: ConversationFile) {
        let state = file.into_state();
        self.rals = RalTracker::from_parts(state.next, state.active);
        self.injections = InjectionQueues::from_parts(state.ral_injections, state.deferred);
        let mut log = EntryLog::new();
        for entry in state.entries {
            log.append(entry);
        }
        self.log = log;
        self.metadata = state.metadata;
        self.agent_todos = state.agent_todos;
        self.todo_nudged = state.todo_nudged;
        self.blocked_agents = state.blocked_agents;
        self.execution_time = state.execution_time;
        self.sessions_by_phase = state.sessions_by_phase;
    }
}

// Re-exported for snapshot plumbing.
pub(crate) type ActiveRalMap = BTreeMap<String, BTreeSet<u64>>;
pub(crate) type NextRalMap = BTreeMap<String, u64>;

// ─── Unit tests ──────────────────────────────────────────────────────────────
