// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Local store unavailable: {0}")]
    Unavailable(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Statement referenced a column the live table does not have.
    #[must_use]
    pub fn is_missing_column(&self) -> bool {
        match self {
            Self::Backend(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("no such column") || msg.contains("has no column named")
            }
            Self::Unavailable(_) => false,
        }
    }

    /// `ALTER TABLE ... ADD COLUMN` lost a race with another migration.
    #[must_use]
    pub fn is_duplicate_column(&self) -> bool {
        matches!(self, Self::Backend(msg) if msg.to_ascii_lowercase().contains("duplicate column"))
    }

    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        if matches!(err, sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut) {
            Self::Unavailable(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}
