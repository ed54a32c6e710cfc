//! Test doubles for the SDK, available under the `testkit` feature.

mod transport;

pub use transport::ScriptedTransport;
