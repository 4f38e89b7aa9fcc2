// Copyright (c) 2025-2026 Confab Contributors
//
// SPDX-License-Identifier: MIT
//! Process-wide directory of live conversation stores.
//!
//! The registry is an explicit value, not a singleton: construct one per
//! process (or per test) with the project path and the known-agent pubkey
//! set, and thread it to whatever needs conversation access.  Stores load
//! lazily from disk and are evicted by `archive`/`complete`; transport
//! events are cached here so late consumers can look them up by id.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::event::NoteEvent;
use crate::log::AppendOutcome;
use crate::persist::ConversationFile;
use crate::store::ConversationStore;

/// Maximum characters of root-event content used for a derived title.
const TITLE_MAX_CHARS: usize = 50;

/// One-per-process directory mapping conversation id → store.
#[derive(Debug)]
pub struct ConversationRegistry {
    base_dir: PathBuf,
    project_id: String,
    agent_pubkeys: Arc<HashSet<String>>,
    stores: HashMap<String, ConversationStore>,
    event_cache: HashMap<String, NoteEvent>,
    /// Reverse index for O(k) cache eviction on archive.
    events_by_conversation: HashMap<String, HashSet<String>>,
}

impl ConversationRegistry {
    /// Build a registry rooted at `base_dir` for the project at
    /// `project_path`.  The project id is the trailing path segment; the
    /// agent set is fixed for the registry's lifetime.
    pub fn new(
        base_dir: impl Into<PathBuf>,
        project_path: &Path,
        agent_pubkeys: impl IntoIterator<Item = String>,
    ) -> Self {
        let project_id = project_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "default".to_string());
        Self {
            base_dir: base_dir.into(),
            project_id,
            agent_pubkeys: Arc::new(agent_pubkeys.into_iter().collect()),
            stores: HashMap::new(),
            event_cache: HashMap::new(),
            events_by_conversation: HashMap::new(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Membership test against the known-agent set.
    pub fn is_agent_pubkey(&self, pubkey: &str) -> bool {
        self.agent_pubkeys.contains(pubkey)
    }

    // ─── Store lifecycle ──────────────────────────────────────────────────────

    /// The in-memory store for `id`, loading from disk (or initializing
    /// empty) when absent.
    pub async fn get_or_load(&mut self, id: &str) -> Result<&mut ConversationStore, StoreError> {
        if !self.stores.contains_key(id) {
            let store = ConversationStore::load(
                &self.base_dir,
                &self.project_id,
                id,
                Arc::clone(&self.agent_pubkeys),
            )
            .await?;
            self.stores.insert(id.to_string(), store);
        }
        Ok(self.stores.get_mut(id).expect("just inserted"))
    }

    /// The store for `id` only if it is live in memory or exists on disk
    /// with a non-empty transcript.
    pub async fn get(&mut self, id: &str) -> Option<&mut ConversationStore> {
        if self.stores.contains_key(id) {
            return self.stores.get_mut(id);
        }
        let path = ConversationStore::snapshot_path(&self.base_dir, &self.project_id, id);
        let raw = tokio::fs::read_to_string(&path).await.ok()?;
        let has_history = serde_json::from_str::<ConversationFile>(&raw)
            .map(|f| f.has_history())
            .unwrap_or(false);
        if !has_history {
            return None;
        }
        self.get_or_load(id).await.ok()
    }

    pub async fn has(&mut self, id: &str) -> bool {
        self.get(id).await.is_some()
    }

    /// Create a new conversation keyed by the root event's id, seed it with
    /// the event, derive a title, and persist.  Returns the existing store
    /// unmodified when the id is already live.
    pub async fn create(&mut self, root: &NoteEvent) -> Result<&mut ConversationStore, StoreError> {
        if root.id.is_empty() {
            return Err(StoreError::MissingRootEventId);
        }
        if self.stores.contains_key(&root.id) {
            debug!(conversation = %root.id, "create on existing conversation; returning it");
            return Ok(self.stores.get_mut(&root.id).expect("checked above"));
        }

        let mut store = ConversationStore::new(
            &self.base_dir,
            &self.project_id,
            root.id.clone(),
            Arc::clone(&self.agent_pubkeys),
        );
        let from_agent = self.is_agent_pubkey(&root.pubkey);
        store.add_event_message(root, from_agent);
        store.set_title(derive_title(&root.content));
        store.save().await?;

        let id = root.id.clone();
        self.cache_event(&id, root.clone());
        self.stores.insert(id.clone(), store);
        Ok(self.stores.get_mut(&id).expect("just inserted"))
    }

    /// Linear scan across live stores for one containing `event_id`.
    pub fn find_by_event_id(&self, event_id: &str) -> Option<&ConversationStore> {
        self.stores.values().find(|s| s.has_event_id(event_id))
    }

    /// Ingest a follow-up event into a conversation, caching it.  Returns
    /// `None` when the event kind is not appendable.
    pub async fn add_event(
        &mut self,
        conversation_id: &str,
        event: &NoteEvent,
    ) -> Result<Option<AppendOutcome>, StoreError> {
        let from_agent = self.is_agent_pubkey(&event.pubkey);
        let store = self.get_or_load(conversation_id).await?;
        let outcome = store.add_event_message(event, from_agent);
        if outcome.is_some() {
            self.cache_event(conversation_id, event.clone());
        }
        Ok(outcome)
    }

    pub async fn set_conversation_title(
        &mut self,
        conversation_id: &str,
        title: impl Into<String>,
    ) -> Result<(), StoreError> {
        self.get_or_load(conversation_id).await?.set_title(title);
        Ok(())
    }

    pub async fn update_conversation_metadata(
        &mut self,
        conversation_id: &str,
        patch: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), StoreError> {
        self.get_or_load(conversation_id).await?.update_metadata(patch);
        Ok(())
    }

    /// Evict `id` from memory without deleting its snapshot, purging its
    /// cached events.
    pub fn archive(&mut self, id: &str) {
        if self.stores.remove(id).is_some() {
            debug!(conversation = id, "conversation archived");
        }
        if let Some(event_ids) = self.events_by_conversation.remove(id) {
            for event_id in event_ids {
                self.event_cache.remove(&event_id);
            }
        }
    }

    /// Save then evict.
    pub async fn complete(&mut self, id: &str) -> Result<(), StoreError> {
        if let Some(store) = self.stores.get(id) {
            store.save().await?;
        }
        self.archive(id);
        Ok(())
    }

    /// Save every live store, in parallel.  The first failure is returned
    /// after all saves have settled.
    pub async fn cleanup(&mut self) -> Result<(), StoreError> {
        let results = join_all(self.stores.values().map(|s| s.save())).await;
        let mut first_error = None;
        for result in results {
            if let Err(err) = result {
                warn!(error = %err, "conversation save failed during cleanup");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // ─── Event cache ──────────────────────────────────────────────────────────

    pub fn cache_event(&mut self, conversation_id: &str, event: NoteEvent) {
        self.events_by_conversation
            .entry(conversation_id.to_string())
            .or_default()
            .insert(event.id.clone());
        self.event_cache.insert(event.id.clone(), event);
    }

    pub fn get_cached_event(&self, event_id: &str) -> Option<&NoteEvent> {
        self.event_cache.get(event_id)
    }

    // ─── Disk queries ─────────────────────────────────────────────────────────

    /// Conversation ids with a snapshot on disk (`*.json` files).
    pub fn list_conversation_ids_from_disk(&self) -> Vec<String> {
        let dir = self
            .base_dir
            .join("projects")
            .join(&self.project_id)
            .join("conversations");
        let Ok(read_dir) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = read_dir
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
            .collect();
        ids.sort();
        ids
    }

    /// Test hook: drop all in-memory state.  Snapshots on disk survive.
    pub fn reset(&mut self) {
        self.stores.clear();
        self.event_cache.clear();
        self.events_by_conversation.clear();
    }
}

/// First [`TITLE_MAX_CHARS`] characters of `content`, with an ellipsis when
/// truncated.
fn derive_title(content: &str) -> String {
    let truncated: String = content.chars().take(TITLE_MAX_CHARS).collect();
    if content.chars().count() > TITLE_MAX_CHARS {
        format!("{truncated}…")
    } else {
        truncated
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::KIND_TEXT;

    fn registry(base: &Path) -> ConversationRegistry {
        ConversationRegistry::new(
            base,
            Path::new("/home/dev/acme-app"),
            vec!["agent1".to_string(), "agent2".to_string()],
        )
    }

    fn root_event(id: &str, content: &str) -> NoteEvent {
        NoteEvent::new(id, "user-pk", KIND_TEXT, content, 1700000000)
    }

    // ── Construction ──────────────────────────────────────────────────────────

    #[test]
    fn project_id_is_trailing_path_segment() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(tmp.path());
        assert_eq!(reg.project_id(), "acme-app");
    }

    #[test]
    fn agent_set_membership() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(tmp.path());
        assert!(reg.is_agent_pubkey("agent1"));
        assert!(!reg.is_agent_pubkey("user-pk"));
    }

    // ── Create ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_seeds_store_with_root_event_and_title() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = registry(tmp.path());
        let ev = root_event("conv1", "short ask");
        let store = reg.create(&ev).await.unwrap();
        assert_eq!(store.entries().len(), 1);
        assert_eq!(store.title(), Some("short ask"));
        assert_eq!(store.root_event_id(), Some("conv1"));
    }

    #[tokio::test]
    async fn create_truncates_long_titles_with_ellipsis() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = registry(tmp.path());
        let long = "x".repeat(80);
        let store = reg.create(&root_event("conv1", &long)).await.unwrap();
        let title = store.title().unwrap();
        assert_eq!(title.chars().count(), 51);
        assert!(title.ends_with('…'));
    }

    #[tokio::test]
    async fn create_without_id_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = registry(tmp.path());
        let ev = root_event("", "whatever");
        assert!(matches!(reg.create(&ev).await, Err(StoreError::MissingRootEventId)));
    }

    #[tokio::test]
    async fn create_twice_returns_existing_unmodified() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = registry(tmp.path());
        reg.create(&root_event("conv1", "first")).await.unwrap();
        let store = reg.create(&root_event("conv1", "second")).await.unwrap();
        assert_eq!(store.entries().len(), 1);
        assert_eq!(store.title(), Some("first"));
    }

    // ── Lookup ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn get_returns_none_for_unknown_conversation() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = registry(tmp.path());
        assert!(reg.get("missing").await.is_none());
        assert!(!reg.has("missing").await);
    }

    #[tokio::test]
    async fn get_loads_persisted_conversation_with_history() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = registry(tmp.path());
        reg.create(&root_event("conv1", "hello")).await.unwrap();
        reg.archive("conv1");

        assert!(reg.has("conv1").await);
        let store = reg.get("conv1").await.unwrap();
        assert_eq!(store.entries().len(), 1);
    }

    #[tokio::test]
    async fn find_by_event_id_scans_live_stores() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = registry(tmp.path());
        reg.create(&root_event("conv1", "one")).await.unwrap();
        reg.create(&root_event("conv2", "two")).await.unwrap();
        let found = reg.find_by_event_id("conv2").unwrap();
        assert_eq!(found.conversation_id(), "conv2");
        assert!(reg.find_by_event_id("missing").is_none());
    }

    // ── Follow-up events ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn add_event_appends_and_caches() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = registry(tmp.path());
        reg.create(&root_event("conv1", "start")).await.unwrap();

        let reply = NoteEvent::new("ev2", "agent1", KIND_TEXT, "on it", 1700000001);
        let outcome = reg.add_event("conv1", &reply).await.unwrap();
        assert_eq!(outcome, Some(AppendOutcome::Appended(1)));
        assert!(reg.get_cached_event("ev2").is_some());
    }

    #[tokio::test]
    async fn add_event_ignores_non_text_kinds() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = registry(tmp.path());
        reg.create(&root_event("conv1", "start")).await.unwrap();
        let status = NoteEvent::new("ev9", "agent1", 24133, "", 1700000002);
        let outcome = reg.add_event("conv1", &status).await.unwrap();
        assert!(outcome.is_none());
        assert!(reg.get_cached_event("ev9").is_none());
    }

    // ── Archive / complete / cache eviction ───────────────────────────────────

    #[tokio::test]
    async fn archive_evicts_store_and_its_cached_events() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = registry(tmp.path());
        reg.create(&root_event("conv1", "start")).await.unwrap();
        let reply = NoteEvent::new("ev2", "agent1", KIND_TEXT, "on it", 1);
        reg.add_event("conv1", &reply).await.unwrap();
        assert!(reg.get_cached_event("conv1").is_some());

        reg.archive("conv1");
        assert!(reg.find_by_event_id("conv1").is_none());
        assert!(reg.get_cached_event("conv1").is_none());
        assert!(reg.get_cached_event("ev2").is_none());
        // Snapshot survives on disk.
        assert!(reg.has("conv1").await);
    }

    #[tokio::test]
    async fn complete_saves_before_evicting() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = registry(tmp.path());
        reg.create(&root_event("conv1", "start")).await.unwrap();
        let reply = NoteEvent::new("ev2", "agent1", KIND_TEXT, "done", 2);
        reg.add_event("conv1", &reply).await.unwrap();

        reg.complete("conv1").await.unwrap();
        let store = reg.get("conv1").await.unwrap();
        assert_eq!(store.entries().len(), 2, "follow-up event must have been persisted");
    }

    #[tokio::test]
    async fn cleanup_saves_all_live_stores() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = registry(tmp.path());
        reg.create(&root_event("conv1", "one")).await.unwrap();
        reg.create(&root_event("conv2", "two")).await.unwrap();
        reg.add_event("conv1", &NoteEvent::new("ev2", "user-pk", KIND_TEXT, "more", 3))
            .await
            .unwrap();

        reg.cleanup().await.unwrap();
        reg.reset();
        assert_eq!(reg.get("conv1").await.unwrap().entries().len(), 2);
        assert_eq!(reg.get("conv2").await.unwrap().entries().len(), 1);
    }

    // ── Disk listing ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn list_conversation_ids_reads_json_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = registry(tmp.path());
        assert!(reg.list_conversation_ids_from_disk().is_empty());
        reg.create(&root_event("conv-b", "b")).await.unwrap();
        reg.create(&root_event("conv-a", "a")).await.unwrap();
        assert_eq!(reg.list_conversation_ids_from_disk(), vec!["conv-a", "conv-b"]);
    }

    #[tokio::test]
    async fn reset_clears_memory_but_not_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reg = registry(tmp.path());
        reg.create(&root_event("conv1", "keep me")).await.unwrap();
        reg.reset();
        assert!(reg.find_by_event_id("conv1").is_none());
        assert!(reg.get_cached_event("conv1").is_none());
        assert!(reg.has("conv1").await);
    }
}
