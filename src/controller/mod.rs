//! # Controller
//!
//! Reconciliation state machine, error backoff and the desired-state object
//! builder.

pub mod backoff;
pub mod objects;
pub mod reconciler;
