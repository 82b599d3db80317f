use std::io;

use thiserror::Error;

use crate::api::ApiError;
use crate::config::ConfigError;
use crate::rewrite::RewriteError;

/// Failures that end a run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid collection config: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("template rewrite failed: {0}")]
    Rewrite(#[from] RewriteError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("columns file {path} is not valid JSON: {source}")]
    Columns {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("collection has no imageset to attach images to")]
    MissingImageset,
}

pub type Result<T> = std::result::Result<T, Error>;
