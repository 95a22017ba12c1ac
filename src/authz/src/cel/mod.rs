//! CEL (Common Expression Language) layer used for rule bodies and ad hoc queries
//!
//! Rules are compiled once per bundle; ad hoc query programs are cached per
//! compiled policy.

pub mod convert;
pub mod engine;
pub mod error;

pub use engine::Engine;
pub use error::{CelError, Result};
