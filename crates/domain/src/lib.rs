//! Shared configuration, error and trace types for the LEITL coordinator.

pub mod config;
pub mod error;
pub mod trace;

pub use error::{Error, Result};
