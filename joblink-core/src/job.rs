//! The unit of work relayed between nodes

use std::collections::HashMap;

use joblink_proto::v1 as proto;
use serde::{Deserialize, Serialize};

/// A unit of work: an opaque payload plus string-keyed metadata.
///
/// Jobs are immutable once constructed and are handed to exactly one
/// reader per channel; there is no identity field and no deduplication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    payload: String,
    metadata: HashMap<String, String>,
}

impl Job {
    /// Create a job with an empty metadata map
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry (builder style)
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    #[must_use]
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }
}

impl From<proto::Job> for Job {
    fn from(job: proto::Job) -> Self {
        Self {
            payload: job.payload,
            metadata: job.metadata,
        }
    }
}

impl From<Job> for proto::Job {
    fn from(job: Job) -> Self {
        Self {
            payload: job.payload,
            metadata: job.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let job = Job::new("transcode").with_metadata("priority", "high");
        assert_eq!(job.payload(), "transcode");
        assert_eq!(
            job.metadata().get("priority").map(String::as_str),
            Some("high")
        );
    }

    #[test]
    fn test_proto_round_trip() {
        let job = Job::new("x").with_metadata("k", "v");
        let wire: proto::Job = job.clone().into();
        assert_eq!(Job::from(wire), job);
    }

    #[test]
    fn test_empty_metadata_survives_conversion() {
        let wire: proto::Job = Job::new("x").into();
        assert!(wire.metadata.is_empty());
        let back = Job::from(wire);
        assert!(back.metadata().is_empty());
    }
}
