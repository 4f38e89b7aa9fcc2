// Copyright (c) 2025-2026 Confab Contributors
//
// SPDX-License-Identifier: MIT
//! Pubkey → display-name resolution.
//!
//! Attribution prefixes in built message views need short human-readable
//! names for 32-byte hex pubkeys.  Resolution is delegated to the embedding
//! application (which may consult a profile directory over the network),
//! hence the async trait.  [`ShortHexNamer`] is the no-dependency fallback.

use async_trait::async_trait;

/// Number of leading hex characters used by the fallback display name.
const SHORT_NAME_LEN: usize = 8;

/// Resolves a pubkey to a short display name.
///
/// `name` may perform IO (profile lookups); `name_sync` must not, and is
/// allowed to return a less accurate fallback for call sites that cannot
/// await.
#[async_trait]
pub trait PubkeyNamer: Send + Sync {
    async fn name(&self, pubkey: &str) -> String;

    fn name_sync(&self, pubkey: &str) -> String {
        short_name(pubkey)
    }
}

/// Truncate a hex pubkey to its first eight characters.
pub fn short_name(pubkey: &str) -> String {
    pubkey.chars().take(SHORT_NAME_LEN).collect()
}

/// Namer that always answers with the truncated hex form.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortHexNamer;

#[async_trait]
impl PubkeyNamer for ShortHexNamer {
    async fn name(&self, pubkey: &str) -> String {
        short_name(pubkey)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
