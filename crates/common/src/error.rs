//! Error types shared across Recompose crates.

use std::path::PathBuf;

/// Top-level error type for composition runs.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    /// Invalid or inconsistent pipeline configuration. Raised before any
    /// resource is allocated.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The source could not be probed or is not something we can decode.
    #[error("Unsupported source: {message}")]
    UnsupportedSource { message: String },

    /// A codec rejected the requested format, size or bitrate.
    #[error("Codec configuration error: {message}")]
    CodecConfiguration { message: String },

    /// A codec failed while running.
    #[error("Codec error ({codec}): {message}")]
    Codec { codec: String, message: String },

    /// The mux sink was driven out of protocol (format set twice, sample
    /// without a resolved format, write after stop).
    #[error("Muxer protocol error: {message}")]
    MuxerProtocol { message: String },

    /// Releasing a native resource failed.
    #[error("Failed to release {resource}: {message}")]
    ResourceRelease {
        resource: String,
        message: String,
        fatal: bool,
    },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using ComposeError.
pub type ComposeResult<T> = Result<T, ComposeError>;

impl ComposeError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    pub fn unsupported_source(msg: impl Into<String>) -> Self {
        Self::UnsupportedSource {
            message: msg.into(),
        }
    }

    pub fn codec_configuration(msg: impl Into<String>) -> Self {
        Self::CodecConfiguration {
            message: msg.into(),
        }
    }

    pub fn codec(codec: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Codec {
            codec: codec.into(),
            message: msg.into(),
        }
    }

    pub fn muxer_protocol(msg: impl Into<String>) -> Self {
        Self::MuxerProtocol {
            message: msg.into(),
        }
    }

    pub fn resource_release(
        resource: impl Into<String>,
        msg: impl Into<String>,
        fatal: bool,
    ) -> Self {
        Self::ResourceRelease {
            resource: resource.into(),
            message: msg.into(),
            fatal,
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Errors raised by a codec, either while configuring or while running.
    pub fn is_codec_error(&self) -> bool {
        matches!(self, Self::Codec { .. } | Self::CodecConfiguration { .. })
    }

    /// Whether this error leaves native resources in an unknown state.
    pub fn is_fatal_release(&self) -> bool {
        matches!(self, Self::ResourceRelease { fatal: true, .. })
    }

    /// Short machine-readable kind, used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::UnsupportedSource { .. } => "unsupported_source",
            Self::CodecConfiguration { .. } => "codec_configuration",
            Self::Codec { .. } => "codec",
            Self::MuxerProtocol { .. } => "muxer_protocol",
            Self::ResourceRelease { .. } => "resource_release",
            Self::Unsupported { .. } => "unsupported",
            Self::FileNotFound { .. } => "file_not_found",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Other(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_errors_are_grouped() {
        assert!(ComposeError::codec("avc-encoder", "dequeue failed").is_codec_error());
        assert!(ComposeError::codec_configuration("bad size").is_codec_error());
        assert!(!ComposeError::muxer_protocol("twice").is_codec_error());
    }

    #[test]
    fn test_fatal_release_flag() {
        assert!(ComposeError::resource_release("demuxer", "busy", true).is_fatal_release());
        assert!(!ComposeError::resource_release("muxer", "busy", false).is_fatal_release());
    }

    #[test]
    fn test_display_includes_resource() {
        let err = ComposeError::resource_release("video composer", "decoder stuck", true);
        assert_eq!(
            err.to_string(),
            "Failed to release video composer: decoder stuck"
        );
        assert_eq!(err.kind(), "resource_release");
    }
}
