//! assuand - demonstration Assuan server
//!
//! The `keystore` profile keeps a small per-connection key/value store and
//! exercises every handler shape the dispatch engine supports.

pub mod keystore;

pub use keystore::{profile, KeystoreState, SUPPORTED_OPTIONS};
