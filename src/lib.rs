pub mod base_ref;
pub mod config;
pub mod delivery;
pub mod error;
pub mod git;
pub mod hook;
pub mod logging;
pub mod payload;
pub mod repository;
pub mod revisions;
pub mod signature;

pub use config::Config;
pub use error::{NotifyError, Result};
pub use hook::{Notifier, RefUpdate};
pub use payload::PushEvent;
