pub mod config;
pub mod error;
pub mod types;

pub use config::DetectionConfig;
pub use error::*;
pub use types::*;
