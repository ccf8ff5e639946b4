//! Error module - Structured error taxonomy for the analysis engine
//!
//! Every fallible operation in the core returns `Result<T>` with
//! [`TagmetryError`] as its error type. Variants map directly onto the error
//! taxonomy used throughout the pipeline: each variant names a failure class the caller can
//! branch on, and carries a plain `message` rather than an internal stack
//! trace, since the job result surfaces this text to end users.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Standard result type for all Tagmetry core operations.
pub type Result<T> = std::result::Result<T, TagmetryError>;

/// Structured error type for the analysis engine.
///
/// Serializes to a tagged JSON object (`{"kind": "...", "message": "..."}`)
/// so the CLI wrapper (or any other caller) can report the error kind
/// without re-deriving it from string matching. The `kind` tag takes each
/// variant's own spelling (`"InputNotFound"`, not `"inputNotFound"`), matching
/// [`TagmetryError::kind_name`] exactly.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TagmetryError {
    /// The input dataset directory does not exist.
    InputNotFound { message: String },
    /// A resolved image path ceased to exist between enumeration and read.
    ImageFileMissing { message: String },
    /// An image's extension was recognized but its header could not be identified.
    UnsupportedImageFormat { message: String },
    /// The recommendation ruleset could not be parsed into the rule envelope.
    InvalidRuleset { message: String },
    /// The tag normalization rules could not be parsed.
    InvalidConfig { message: String },
    /// A filesystem read/write failure not covered by a more specific variant.
    IoFailure { message: String },
    /// The job was cooperatively cancelled.
    Cancelled { message: String },
}

impl TagmetryError {
    /// Returns the taxonomy name of this error kind (no internal detail),
    /// suitable for the `error` field of an [`crate::AnalysisResult`].
    pub fn kind_name(&self) -> &'static str {
        match self {
            TagmetryError::InputNotFound { .. } => "InputNotFound",
            TagmetryError::ImageFileMissing { .. } => "ImageFileMissing",
            TagmetryError::UnsupportedImageFormat { .. } => "UnsupportedImageFormat",
            TagmetryError::InvalidRuleset { .. } => "InvalidRuleset",
            TagmetryError::InvalidConfig { .. } => "InvalidConfig",
            TagmetryError::IoFailure { .. } => "IoFailure",
            TagmetryError::Cancelled { .. } => "Cancelled",
        }
    }

    /// `true` iff this error represents cooperative cancellation, never a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TagmetryError::Cancelled { .. })
    }

    pub fn io(message: impl Into<String>) -> Self {
        TagmetryError::IoFailure { message: message.into() }
    }

    pub fn cancelled() -> Self {
        TagmetryError::Cancelled { message: "Operation cancelled.".to_string() }
    }
}

impl fmt::Display for TagmetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagmetryError::InputNotFound { message } => write!(f, "Input not found: {}", message),
            TagmetryError::ImageFileMissing { message } => write!(f, "Image file missing: {}", message),
            TagmetryError::UnsupportedImageFormat { message } => {
                write!(f, "Unsupported image format: {}", message)
            }
            TagmetryError::InvalidRuleset { message } => write!(f, "Invalid ruleset: {}", message),
            TagmetryError::InvalidConfig { message } => write!(f, "Invalid config: {}", message),
            TagmetryError::IoFailure { message } => write!(f, "I/O failure: {}", message),
            TagmetryError::Cancelled { message } => write!(f, "Cancelled: {}", message),
        }
    }
}

impl std::error::Error for TagmetryError {}

impl From<std::io::Error> for TagmetryError {
    fn from(err: std::io::Error) -> Self {
        TagmetryError::IoFailure { message: err.to_string() }
    }
}

impl From<serde_json::Error> for TagmetryError {
    fn from(err: serde_json::Error) -> Self {
        TagmetryError::InvalidConfig { message: format!("JSON error: {}", err) }
    }
}

impl From<serde_yaml::Error> for TagmetryError {
    fn from(err: serde_yaml::Error) -> Self {
        TagmetryError::InvalidConfig { message: format!("YAML error: {}", err) }
    }
}

impl From<walkdir::Error> for TagmetryError {
    fn from(err: walkdir::Error) -> Self {
        TagmetryError::IoFailure { message: format!("Directory traversal error: {}", err) }
    }
}

impl From<image::ImageError> for TagmetryError {
    fn from(err: image::ImageError) -> Self {
        TagmetryError::UnsupportedImageFormat { message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tag_serializes_to_the_same_spelling_as_kind_name() {
        let errors = [
            TagmetryError::InputNotFound { message: "x".to_string() },
            TagmetryError::ImageFileMissing { message: "x".to_string() },
            TagmetryError::UnsupportedImageFormat { message: "x".to_string() },
            TagmetryError::InvalidRuleset { message: "x".to_string() },
            TagmetryError::InvalidConfig { message: "x".to_string() },
            TagmetryError::IoFailure { message: "x".to_string() },
            TagmetryError::Cancelled { message: "x".to_string() },
        ];
        for err in &errors {
            let value: serde_json::Value = serde_json::to_value(err).unwrap();
            assert_eq!(value["kind"].as_str().unwrap(), err.kind_name());
        }
    }
}
