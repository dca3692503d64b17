// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local persistence: one embedded SQLite store shared by every entity cache.

pub mod sqlite;
pub mod statement;
pub mod traits;

pub use sqlite::{decode_value, LocalStore, StoreMode, MEMORY_URL};
pub use statement::{placeholders, quote_ident, Statement};
pub use traits::StorageError;
