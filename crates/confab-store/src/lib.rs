// Copyright (c) 2025-2026 Confab Contributors
//
// SPDX-License-Identifier: MIT
//! Per-conversation state engine for multi-agent LLM orchestration.
//!
//! Each conversation owns an append-only transcript, per-agent
//! reason-act-loop lifecycles, injection queues for out-of-band signals,
//! and a snapshot file.  The view builder materializes the transcript as
//! one (agent, loop) pair should see it, with visibility filtering,
//! attribution prefixes, multimodal expansion, and the tool-call adjacency
//! repairs downstream LLM APIs require.
//!
//! Everything is an in-process library call; transport, LLM invocation,
//! and tool execution live with the embedding application.

mod entry;
mod error;
mod event;
mod injection;
mod log;
mod persist;
mod ral;
mod registry;
mod store;
mod view;

pub use entry::{
    Entry, TextEntry, ToolCallEntry, ToolResultEntry, DELEGATION_COMPLETED_MARKER,
    INTERRUPTED_MARKER,
};
pub use error::StoreError;
pub use event::{NoteEvent, KIND_TEXT};
pub use injection::{DeferredInjection, InjectionRole, RalInjection};
pub use log::{AppendOutcome, EntryLog};
pub use ral::RalTracker;
pub use registry::ConversationRegistry;
pub use store::{ConversationStore, ExecutionTime, Metadata, ReferencedArticle};
pub use view::{summarize_ral, ViewBuilder};
