//! Testing utilities and mock implementations
//!
//! This module provides a mock session transport so the session lifecycle can
//! be tested without a broker or real certificates.

pub mod mocks;

pub use mocks::*;
