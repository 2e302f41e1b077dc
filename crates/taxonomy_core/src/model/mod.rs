//! Domain model for namespaces, taxonomies, categories and classifications.
//!
//! # Responsibility
//! - Define the canonical records shared by repositories and services.
//! - Host pure invariant helpers (path derivation, status transitions,
//!   score and slug validation) that need no storage access.
//!
//! # Invariants
//! - Every record is tenant-scoped and identified by a UUID.
//! - Deletion is a soft-delete tombstone (`deleted_at`), never a hard delete.

pub mod category;
pub mod classification;
pub mod metadata;
pub mod namespace;
pub mod taxonomy;
pub mod validation;
