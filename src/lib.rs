//! AzureApp Operator Library
//!
//! Core functionality for the AzureApp operator: the CRD types, the
//! reconciliation state machine, the Terraform dependency orchestrator, the
//! database principal manager and the desired-state object builder.

pub mod azure;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod dependencies;
pub mod error;
pub mod runtime;

pub use crd::{AzureApp, AzureAppSpec, AzureAppStatus};
pub use error::{Error, Result};
