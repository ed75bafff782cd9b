//! Hyperpod shared types
//!
//! This crate contains the error types, constants, and VM wire types used by
//! both the daemon and hypervisor backend implementations.

pub mod constants;
pub mod errors;
pub mod vm;

pub use errors::{HyperpodError, HyperpodResult};
pub use vm::{KeepMode, VmData, VmEventCode, VmResponse, VmStatus};
