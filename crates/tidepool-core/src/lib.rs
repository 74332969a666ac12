//! # tidepool-core
//!
//! Core types, traits, and abstractions for the tidepool stream server.
//!
//! This crate provides the foundational data structures shared by the
//! database layer and the service layer: the error enum, the domain models
//! (users, accounts, streams, statuses), status-id ordering, and per-user
//! settings.

pub mod error;
pub mod logging;
pub mod models;
pub mod settings;
pub mod status_id;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use settings::UserSettings;
pub use status_id::StatusId;
pub use uuid_utils::new_v7;
