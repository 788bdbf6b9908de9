//! Core domain logic for slidepin: turning reviewer output into positioned
//! slide pins, and the project/context registry.
//!
//! Nothing here touches a UI or a concrete storage backend; collaborators
//! are injected through [`persistence::KeyValueStore`].

pub mod anchor;
pub mod document;
pub mod error;
pub mod feedback;
pub mod persistence;
pub mod pins;
pub mod project;
pub mod types;

pub use error::CoreError;
