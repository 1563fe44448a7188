//! Testing utilities and mock implementations
//!
//! Mocks for exercising topic clients, listeners and collectors without a
//! running MQTT broker.

pub mod mocks;

pub use mocks::*;
