//! `dirbatch-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model, and the validated value objects that
//! name directory entities.

pub mod error;
pub mod id;
pub mod value_object;

pub use error::{DomainError, DomainResult};
pub use id::{JobId, TaskId};
pub use value_object::{EmailAddress, EntityKey, OuPath, ValueObject};
