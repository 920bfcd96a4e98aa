//! Error types shared across Stackfuse crates.

use std::path::PathBuf;

/// Top-level error type for Stackfuse operations.
#[derive(Debug, thiserror::Error)]
pub enum FocusError {
    #[error("Alignment error: {message}")]
    Alignment { message: String },

    /// A per-image correlation solve that broke down or never reached an
    /// acceptable correlation. Never fatal to the rest of the stack.
    #[error("Image {index} did not converge: {message}")]
    Convergence { index: usize, message: String },

    #[error("Mask error: {message}")]
    Mask { message: String },

    #[error("{tool} exited with {status}: {stderr}")]
    Process {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("External tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Project error: {message}")]
    Project { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using FocusError.
pub type FocusResult<T> = Result<T, FocusError>;

impl FocusError {
    pub fn alignment(msg: impl Into<String>) -> Self {
        Self::Alignment {
            message: msg.into(),
        }
    }

    pub fn convergence(index: usize, msg: impl Into<String>) -> Self {
        Self::Convergence {
            index,
            message: msg.into(),
        }
    }

    pub fn mask(msg: impl Into<String>) -> Self {
        Self::Mask {
            message: msg.into(),
        }
    }

    pub fn project(msg: impl Into<String>) -> Self {
        Self::Project {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn process(tool: impl Into<String>, status: impl ToString, stderr: impl Into<String>) -> Self {
        Self::Process {
            tool: tool.into(),
            status: status.to_string(),
            stderr: stderr.into(),
        }
    }

    /// Whether this error is the cancellation signal rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(FocusError::alignment("x")
            .to_string()
            .contains("Alignment error:"));
        assert!(FocusError::mask("x").to_string().contains("Mask error:"));
        assert_eq!(
            FocusError::convergence(3, "singular hessian").to_string(),
            "Image 3 did not converge: singular hessian"
        );
    }

    #[test]
    fn process_failure_reports_tool_and_status() {
        let err = FocusError::process("enfuse", "exit status: 1", "bad input");
        let text = err.to_string();
        assert!(text.contains("enfuse"));
        assert!(text.contains("exit status: 1"));
        assert!(text.contains("bad input"));
    }

    #[test]
    fn only_cancelled_is_cancelled() {
        assert!(FocusError::Cancelled.is_cancelled());
        assert!(!FocusError::mask("x").is_cancelled());
    }
}
