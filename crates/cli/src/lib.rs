//! Command-line front end for slidepin.
//!
//! Parses reviewer output into pins for a document, manages the project
//! registry and runs periodic context maintenance against a
//! [`JsonFileStore`](slidepin_core::persistence::JsonFileStore).

pub mod commands;
pub mod config;
pub mod maintenance;
