// Copyright (c) 2025-2026 Confab Contributors
//
// SPDX-License-Identifier: MIT
//! Out-of-band message queues.
//!
//! A RAL-targeted injection interrupts one specific loop of one agent and
//! surfaces only inside that loop.  A deferred injection waits for the
//! agent's next loop, whichever that turns out to be, and is merged by the
//! agent runtime rather than by the store.

use serde::{Deserialize, Serialize};

/// How an injected message should read once it surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InjectionRole {
    User,
    System,
}

/// An injection addressed to a specific (agent, loop) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RalInjection {
    pub pubkey: String,
    pub ral: u64,
    pub role: InjectionRole,
    pub content: String,
    /// Unix seconds at enqueue time.
    pub queued_at: i64,
}

/// An injection addressed to an agent's next loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredInjection {
    pub pubkey: String,
    pub role: InjectionRole,
    pub content: String,
    pub queued_at: i64,
    /// Free-form origin tag (e.g. the subsystem that queued it).
    pub source: Option<String>,
}

/// Both queues, in arrival order.
#[derive(Debug, Default)]
pub struct InjectionQueues {
    ral_targeted: Vec<RalInjection>,
    deferred: Vec<DeferredInjection>,
}

impl InjectionQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue_ral(&mut self, injection: RalInjection) {
        self.ral_targeted.push(injection);
    }

    pub fn enqueue_deferred(&mut self, injection: DeferredInjection) {
        self.deferred.push(injection);
    }

    /// All injections waiting for (agent, ral), arrival order preserved.
    pub fn peek_ral(&self, agent: &str, ral: u64) -> Vec<&RalInjection> {
        self.ral_targeted
            .iter()
            .filter(|i| i.pubkey == agent && i.ral == ral)
            .collect()
    }

    /// Remove and return all injections waiting for (agent, ral).
    ///
    /// The caller (the store) is responsible for appending the drained
    /// injections to the conversation log.
    pub fn drain_ral(&mut self, agent: &str, ral: u64) -> Vec<RalInjection> {
        let (matched, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.ral_targeted)
            .into_iter()
            .partition(|i| i.pubkey == agent && i.ral == ral);
        self.ral_targeted = rest;
        matched
    }

    pub fn peek_deferred(&self, agent: &str) -> Vec<&DeferredInjection> {
        self.deferred.iter().filter(|i| i.pubkey == agent).collect()
    }

    /// Remove and return all deferred injections for `agent`.  No log side
    /// effect: the agent runtime merges these as it sees fit.
    pub fn drain_deferred(&mut self, agent: &str) -> Vec<DeferredInjection> {
        let (matched, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|i| i.pubkey == agent);
        self.deferred = rest;
        matched
    }

    pub fn ral_targeted(&self) -> &[RalInjection] {
        &self.ral_targeted
    }

    pub fn deferred(&self) -> &[DeferredInjection] {
        &self.deferred
    }

    /// Rebuild from persisted state.
    pub fn from_parts(ral_targeted: Vec<RalInjection>, deferred: Vec<DeferredInjection>) -> Self {
        Self { ral_targeted, deferred }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
