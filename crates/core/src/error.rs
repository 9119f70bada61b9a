use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::PropertyId;

#[derive(Error, Debug)]
pub enum LeakError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("insufficient data for {property_id}: {have} readings, need {need}")]
    InsufficientData {
        property_id: PropertyId,
        have: usize,
        need: usize,
    },

    #[error("malformed reading for {property_id} at {timestamp}: {reason}")]
    MalformedReading {
        property_id: PropertyId,
        timestamp: DateTime<Utc>,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("pattern store error: {0}")]
    PatternStore(String),

    #[error("replay input out of order for {property_id} at {timestamp}")]
    ReplayOutOfOrder {
        property_id: PropertyId,
        timestamp: DateTime<Utc>,
    },
}
