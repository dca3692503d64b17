// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The server side, as the engine sees it.
//!
//! Two traits split the surface: [`RemoteSource`] is the entity's REST
//! resource (list, fetch by ID, create/update/delete) and
//! [`IntegrityAuthority`] serves the hash endpoints. One server usually
//! implements both, but a cache only needs the authority for validation.

#[cfg(feature = "http")]
pub mod http;
pub mod memory;
pub mod traits;

#[cfg(feature = "http")]
pub use http::HttpRemote;
pub use memory::{FetchMode, IntegrityMode, MemoryAuthority};
pub use traits::{
    AuthorityGlobal, DebugHash, IdRange, IntegrityAuthority, ListParams, Page, RemoteError,
    RemoteSource,
};
