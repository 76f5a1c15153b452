//! Error taxonomy for the generation engine.
//!
//! Every variant except a duplicate genome is fatal to the run. Duplicates
//! never surface here: the ledger reports them as a rejected admission.

use std::path::PathBuf;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Layer directory unreadable: {}: {source}", .path.display())]
    LayerDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Genome error: {0}")]
    Genome(String),

    #[error(
        "You need more layers or elements to grow layer configuration {batch} to {target} editions \
         ({rejections} consecutive duplicate genomes)"
    )]
    Exhausted {
        batch: usize,
        target: u32,
        rejections: u32,
    },

    #[error("Render failed for edition {edition}: {message}")]
    Render { edition: u32, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl EngineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn genome(msg: impl Into<String>) -> Self {
        Self::Genome(msg.into())
    }

    pub fn render(edition: u32, msg: impl Into<String>) -> Self {
        Self::Render {
            edition,
            message: msg.into(),
        }
    }

    /// True for errors that abort a run after generation has started.
    pub fn is_generation_abort(&self) -> bool {
        matches!(self, Self::Exhausted { .. } | Self::Render { .. })
    }
}
