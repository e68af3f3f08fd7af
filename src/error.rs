//! Error types for the bridge core.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Failures the core can report. None of them is fatal to the process.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Inbound payload was not JSON or did not match the expected shape.
    #[error("Malformed payload on {topic}: {reason}")]
    MalformedPayload { topic: String, reason: String },

    /// Transport refused or failed a publish.
    #[error("Failed to publish to {topic}: {message}")]
    Publish { topic: String, message: String },

    /// Persistent document could not be read or written.
    #[error("Store I/O error ({path}): {source}")]
    StoreIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Persistent document could not be encoded or decoded.
    #[error("Store format error: {0}")]
    StoreFormat(#[from] serde_json::Error),

    /// Operation referenced a device that is not in the roster.
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Two or more widgets claim the same grid cells.
    #[error("Overlapping widgets: {}", .pairs.join(", "))]
    Overlap { pairs: Vec<String> },

    /// The bridge task is gone.
    #[error("Bridge channel closed")]
    ChannelClosed,
}

impl BridgeError {
    pub fn malformed(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    pub fn publish(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            topic: topic.into(),
            message: message.into(),
        }
    }

    pub fn store_io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::StoreIo {
            path: path.display().to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_message_lists_pairs() {
        let err = BridgeError::Overlap {
            pairs: vec!["a ↔ b".to_string(), "b ↔ c".to_string()],
        };
        assert_eq!(err.to_string(), "Overlapping widgets: a ↔ b, b ↔ c");
    }
}
