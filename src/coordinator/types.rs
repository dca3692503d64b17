// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the mirror engine.

use std::fmt;

/// Where a [`super::MirrorEngine`] is in its lifecycle.
///
/// Read it with [`super::MirrorEngine::state()`] or follow transitions through
/// [`super::MirrorEngine::state_receiver()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// Entities may be registered; nothing is open yet
    Created,
    /// Store opening, tables migrating
    Starting,
    /// Caches initialized, validation timers armed
    Running,
    ShuttingDown,
    /// Store closed; the engine cannot be restarted
    Stopped,
}

impl EngineState {
    /// Stable label used in logs and the `entity_mirror_state_transitions_total` counter.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
