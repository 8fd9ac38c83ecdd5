//! Match Logic Module
//!
//! Price-time priority matching. A pass is computed as a [`MatchPlan`]
//! against a read-only book and applied only once the caller decides to
//! commit it.

pub mod matcher;

pub use matcher::{MatchPlan, Matcher};
