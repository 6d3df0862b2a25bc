use std::path::PathBuf;

/// Everything that can go wrong between raw input and a prediction.
#[derive(Debug, thiserror::Error)]
pub enum CopilotError {
    /// Rejected before any feature is derived.
    #[error("invalid input for `{field}`: {reason}")]
    InvalidInput { field: String, reason: String },

    /// A model artifact is missing, unreadable, or disagrees with the feature schema.
    #[error("failed to load model artifact {}: {reason}", path.display())]
    ModelLoad { path: PathBuf, reason: String },

    /// A derived feature came out NaN or infinite.
    #[error("derived feature `{feature}` is not finite ({value})")]
    FeatureDerivation { feature: &'static str, value: f64 },

    /// Failure inside a model forward pass, passed through as-is.
    #[error(transparent)]
    Model(#[from] anyhow::Error),
}

impl CopilotError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn model_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ModelLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CopilotError>;
