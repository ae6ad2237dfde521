//! Common utilities for ferrodoc
//!
//! This crate provides the error type shared by every ferrodoc crate.

pub mod error;

pub use error::{FerrodocError, Result};
