//! Error taxonomy for an assembly run.
//!
//! Every variant is fatal to the whole run. Each one carries the step,
//! category or file it concerns so the operator can act on the message alone.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::manifest::Category;

#[derive(Error, Debug)]
pub enum AssembleError {
    #[error("no build steps named '{entry_point}' found under '{}'", root.display())]
    Discovery { root: PathBuf, entry_point: String },

    #[error("walking source tree '{}': {source}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("build step '{step}' failed: {reason}")]
    Execution { step: String, reason: String },

    #[error("build step '{step}' printed an invalid manifest: {source}")]
    Parse {
        step: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("build step '{step}' manifest rejected: {reason}")]
    Schema { step: String, reason: String },

    #[error(
        "build step '{step}' cannot place {category} entry '{subpath}' from '{}': {reason}",
        source_path.display()
    )]
    Placement {
        step: String,
        category: Category,
        subpath: String,
        source_path: PathBuf,
        reason: String,
    },

    #[error("{tool} failed: {reason}")]
    ExternalTool { tool: String, reason: String },

    #[error("staging tree '{}': {reason}", path.display())]
    Staging { path: PathBuf, reason: String },

    #[error("{context} '{}': {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl AssembleError {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }

    /// Short stage name used in diagnostics and the process exit line.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Discovery { .. } | Self::Walk { .. } => "discovery",
            Self::Execution { .. } => "execution",
            Self::Parse { .. } => "parse",
            Self::Schema { .. } => "schema",
            Self::Placement { .. } => "placement",
            Self::ExternalTool { .. } => "image",
            Self::Staging { .. } | Self::Io { .. } => "staging",
        }
    }
}

pub type Result<T> = std::result::Result<T, AssembleError>;
