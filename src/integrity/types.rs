// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for validation passes.

use std::fmt;

/// Terminal result of one validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Local mirror matches the authority (or population was ensured)
    Healthy,
    /// Mismatch or failure; local data kept, next cycle retries
    Unhealthy(UnhealthyReason),
    /// Pass did not run
    Skipped(SkipReason),
}

impl ValidationOutcome {
    /// Label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy(_) => "unhealthy",
            Self::Skipped(_) => "skipped",
        }
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "Healthy"),
            Self::Unhealthy(reason) => write!(f, "Unhealthy({})", reason),
            Self::Skipped(reason) => write!(f, "Skipped({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnhealthyReason {
    /// Integrity or resource endpoint failed with a server/network error
    AuthorityUnreachable(String),
    /// Counts still differ after ID-range repair
    CountMismatch { local: u64, authority: u64 },
    /// Global hashes still differ after block repair
    HashMismatch { local: String, authority: String },
    /// Local store failed mid-pass
    LocalStore(String),
}

impl fmt::Display for UnhealthyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthorityUnreachable(e) => write!(f, "authority unreachable: {}", e),
            Self::CountMismatch { local, authority } => {
                write!(f, "count mismatch: local={}, authority={}", local, authority)
            }
            Self::HashMismatch { local, authority } => {
                write!(f, "hash mismatch: local={}, authority={}", short(local), short(authority))
            }
            Self::LocalStore(e) => write!(f, "local store: {}", e),
        }
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another pass on the same entity is in progress
    AlreadyRunning,
    /// Local store could not be opened
    StoreUnavailable,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "already running"),
            Self::StoreUnavailable => write!(f, "store unavailable"),
        }
    }
}

/// What a healthy verdict is based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verification {
    /// Nothing compared (skipped or failed early)
    #[default]
    None,
    /// Authority offers no hashes; only "locally populated" was checked
    PopulationOnly,
    /// Global hashes compared
    Hashes,
}

/// Protocol steps, recorded in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStep {
    FetchAuthority,
    EnsurePopulated,
    CountCheck,
    FullRefetch,
    IdRangeRepair,
    GlobalHashCheck,
    BlockRepair,
    GlobalRecheck,
}

/// Rows and blocks touched by one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairStats {
    pub rows_fetched: usize,
    pub rows_deleted: usize,
    pub blocks_repaired: usize,
    pub full_refetches: usize,
}

impl RepairStats {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Everything one `validate()` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub table: String,
    pub outcome: ValidationOutcome,
    pub verification: Verification,
    pub steps: Vec<ValidationStep>,
    pub stats: RepairStats,
}

impl ValidationReport {
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            outcome: ValidationOutcome::Skipped(SkipReason::AlreadyRunning),
            verification: Verification::None,
            steps: Vec::new(),
            stats: RepairStats::default(),
        }
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.outcome == ValidationOutcome::Healthy
    }

    #[must_use]
    pub fn ran(&self, step: ValidationStep) -> bool {
        self.steps.contains(&step)
    }

    /// Position of a step in execution order.
    #[must_use]
    pub fn position(&self, step: ValidationStep) -> Option<usize> {
        self.steps.iter().position(|s| *s == step)
    }

    pub(crate) fn step(&mut self, step: ValidationStep) {
        self.steps.push(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_display() {
        assert_eq!(ValidationOutcome::Healthy.to_string(), "Healthy");
        let outcome = ValidationOutcome::Unhealthy(UnhealthyReason::CountMismatch { local: 3, authority: 4 });
        assert_eq!(outcome.to_string(), "Unhealthy(count mismatch: local=3, authority=4)");
        assert_eq!(outcome.as_str(), "unhealthy");
    }

    #[test]
    fn test_hash_mismatch_shortens_hashes() {
        let reason = UnhealthyReason::HashMismatch {
            local: "a".repeat(64),
            authority: "b".repeat(64),
        };
        assert_eq!(reason.to_string(), "hash mismatch: local=aaaaaaaaaaaa, authority=bbbbbbbbbbbb");
    }

    #[test]
    fn test_report_step_order() {
        let mut report = ValidationReport::new("tasks");
        report.step(ValidationStep::FetchAuthority);
        report.step(ValidationStep::CountCheck);
        assert!(report.ran(ValidationStep::CountCheck));
        assert_eq!(report.position(ValidationStep::CountCheck), Some(1));
        assert_eq!(report.position(ValidationStep::BlockRepair), None);
        assert!(report.stats.is_empty());
    }
}
