//! # acp-client
//!
//! Client library for ACP devices.
//!
//! This crate provides:
//! - A timeout-bounded session over any async byte stream, with optional
//!   send and receive transforms
//! - A driver for the two supported operations: bulk property read and
//!   single property write

pub mod client;
pub mod error;
pub mod session;

pub use client::{Client, PropertyBatch, PropertyFailure, SetOutcome};
pub use error::ClientError;
pub use session::{Session, SessionConfig, SessionState, Transform};
