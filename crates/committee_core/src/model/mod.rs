//! Committee and member domain model.
//!
//! # Responsibility
//! - Define the records persisted by the repository layer.
//! - Keep field validation next to the data it guards.
//!
//! # Invariants
//! - Every record is identified by a UID minted at creation time.
//! - Revisions are never stored inside records; they come from the store.

pub mod committee;
pub mod etag;
pub mod member;
