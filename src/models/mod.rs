//! Data models for stored objects and their chunk rows.
//!
//! These entities describe the chunked-object layout: one metadata record per
//! stored file plus ordered binary chunks referencing it. They map to database
//! tables via `sqlx::FromRow` and serialize naturally as JSON via `serde`.

pub mod chunk;
pub mod file;
