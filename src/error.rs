//! Error taxonomy for the per-frame computations.
//!
//! These are all recoverable: the pipeline logs them and moves on to the
//! next frame pair. I/O, configuration and transport failures use `anyhow`.

/// Errors raised while converting, indexing or validating a frame.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackError {
    /// The incoming image cannot be interpreted in the required pixel format.
    #[error("image conversion failed: {0}")]
    Conversion(String),

    /// The pixel (or the byte range behind it) lies outside the cloud.
    #[error("pixel ({u}, {v}) is outside the {width}x{height} cloud")]
    OutOfBounds {
        u: i64,
        v: i64,
        width: u32,
        height: u32,
    },

    /// A required point field is not declared by the cloud.
    #[error("point cloud has no '{0}' field")]
    MissingField(String),

    /// A required point field is declared with a type other than FLOAT32.
    #[error("point field '{name}' has datatype {datatype}, expected FLOAT32")]
    UnsupportedField { name: String, datatype: u8 },

    /// The cloud layout itself is inconsistent.
    #[error("invalid point cloud: {0}")]
    InvalidCloud(String),
}

impl TrackError {
    pub(crate) fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion(message.into())
    }

    /// Short, stable code used in log lines and frame outcomes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Conversion(_) => "conversion",
            Self::OutOfBounds { .. } => "out_of_bounds",
            Self::MissingField(_) => "missing_field",
            Self::UnsupportedField { .. } => "unsupported_field",
            Self::InvalidCloud(_) => "invalid_cloud",
        }
    }
}

pub type TrackResult<T> = std::result::Result<T, TrackError>;
