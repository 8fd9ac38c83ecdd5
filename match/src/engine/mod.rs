//! Match Engine Module
//!
//! This module contains the core components of the matching engine system:
//! - `data`: Order book and depth snapshots
//! - `entry`: Orders, trades and id sequences
//! - `error`: Engine error taxonomy
//! - `matchlogic`: Price-time matching algorithm
//! - `spot`: Spot market order processing

pub mod data;
pub mod entry;
pub mod error;
pub mod matchlogic;
pub mod spot;
