// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Block/global Merkle-style hashing for integrity verification.
//!
//! # Design
//!
//! A mirrored table is partitioned by primary key into fixed-size blocks:
//!
//! ```text
//! ids      1 ... 1023 | 1024 ... 2047 | ...
//! block    0          | 1             | ...
//!
//! global ── H(block_0 ‖ block_1 ‖ ...)
//!            └── block_k ── H(row_a ‖ row_b ‖ ...)
//!                            └── row_a ── H("12|Write docs|0|t|1704067200000")
//! ```
//!
//! # Verification Protocol
//!
//! 1. Compare row counts with the authority (cheap)
//! 2. Compare global hashes
//! 3. If different, compare block lists and isolate mismatched blocks
//! 4. Within a block, compare row hashes and transfer only differing rows
//!
//! This is O(diff_size × block_size) instead of O(total_rows).

pub mod encoder;
pub mod expression;
mod hasher;

pub use expression::{encoded_fields, row_expression, FIELD_DELIMITER};
pub use hasher::{digest, BlockHash, GlobalHash, RowHash, TableHasher, DEFAULT_BLOCK_SIZE};
