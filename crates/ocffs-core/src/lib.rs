pub mod config;
pub mod error;
pub mod types;

pub use config::MountTuning;
pub use error::{OcffsError, OcffsResult};
pub use types::{PlaceholderRecord, SyncClient};
