// Copyright (c) 2025-2026 Confab Contributors
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the store and registry.
///
/// Duplicate events are deliberately not here: they are an expected
/// condition reported through [`AppendOutcome::Duplicate`](crate::AppendOutcome),
/// not a failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not read conversation snapshot '{path}'")]
    SnapshotRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write conversation snapshot '{path}'")]
    SnapshotWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("root event is missing an id")]
    MissingRootEventId,
}
