#![cfg(not(tarpaulin_include))]

//! Defines mock structures to test against without hardware (requires the
//! `mocks` feature flag outside of this crate's own tests).

pub mod transport;

pub use transport::{MockOpenFailure, MockTransport};
