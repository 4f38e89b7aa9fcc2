// Copyright (c) 2025-2026 Confab Contributors
//
// SPDX-License-Identifier: MIT
//! Wire-format vocabulary shared by the conversation store and its callers.
//!
//! The types here describe exactly what a downstream LLM API accepts: a flat
//! sequence of role-tagged messages whose content is plain text, mixed
//! text/image parts, a batch of tool calls, or a batch of tool results.
//! They carry no conversation-level state; building a message sequence from
//! a transcript is the store's job.

mod naming;
mod types;

pub use naming::{short_name, PubkeyNamer, ShortHexNamer};
pub use types::*;
