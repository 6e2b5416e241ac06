#![forbid(unsafe_code)]
#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Per-user courseware state storage with pluggable record backends.

pub mod client;
pub mod config;
pub mod error;
pub mod inmemory;
pub mod key;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod store;
pub mod util;
pub mod views;

pub use crate::client::{StoreBackedClient, UserStateClient};
pub use crate::config::{BackendConfig, StoreConfig, open_record_store};
pub use crate::error::{SResult, StateError};
pub use crate::key::{CourseKey, Scope, UsageKey};
pub use crate::store::{RecordStore, StudentRecord};
pub use crate::util::FieldMap;
