// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integrity validation and repair.
//!
//! Each [`EntityCache`](crate::cache::EntityCache) validates itself against
//! the authority with a multi-phase protocol that moves as little data as
//! possible:
//!
//! ```text
//!  global {hash, count} ──4xx / no hash──► ensure populated ──► Healthy (population only)
//!        │ 5xx / network ─────────────────────────────────────► Unhealthy (unreachable)
//!        ▼
//!  count check ──differs──► large gap? ──yes──► full refetch ─┐
//!        │                      │ no                          │
//!        │                      ▼                             │
//!        │                ID-range repair ────────────────────┤
//!        │                                                    ▼
//!        │                                    recount differs? ──► Unhealthy (count)
//!        ▼                                                    │
//!  global hash check ◄────────────────────────────────────────┘
//!        │ equal ──► Healthy
//!        ▼
//!  block repair (mismatched blocks only) ──► recheck ──► Healthy / Unhealthy (hash)
//! ```
//!
//! Passes are reentrancy-guarded per entity: a trigger that arrives while a
//! pass runs returns `Skipped(AlreadyRunning)` immediately.

mod diagnostics;
mod repair;
mod types;
mod validator;

pub use diagnostics::{BlockDiagnosis, FieldDivergence, GlobalDiagnosis, RowDiagnosis};
pub use types::{
    RepairStats, SkipReason, UnhealthyReason, ValidationOutcome, ValidationReport, ValidationStep,
    Verification,
};

use thiserror::Error;

use crate::remote::RemoteError;
use crate::storage::StorageError;

/// Failure that ends a pass early.
#[derive(Error, Debug)]
pub(crate) enum PassError {
    #[error(transparent)]
    Store(#[from] StorageError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl PassError {
    fn into_outcome(self) -> ValidationOutcome {
        match self {
            Self::Store(e) if e.is_unavailable() => ValidationOutcome::Skipped(SkipReason::StoreUnavailable),
            Self::Store(e) => ValidationOutcome::Unhealthy(UnhealthyReason::LocalStore(e.to_string())),
            Self::Remote(e) => ValidationOutcome::Unhealthy(UnhealthyReason::AuthorityUnreachable(e.to_string())),
        }
    }
}
