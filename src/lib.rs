// Library root
// -----------
// Builds a template based collection on the collection service: the data
// file, one imageset per image folder, and a template whose local image
// paths are rewritten to the uploaded images.
//
// Module responsibilities:
// - `api`: blocking HTTP gateway to the service and its token holder.
// - `auth`: exchanges credentials for bearer tokens.
// - `config`: the YAML collection description and its validation.
// - `upload`: uploads a folder of images, retrying on expired tokens.
// - `rewrite`: rewrites template image references to imageset URLs.
// - `collection`: sequences the whole run.
// - `ui` and `logging`: terminal prompts, progress and log output.
pub mod api;
pub mod auth;
pub mod collection;
pub mod config;
pub mod error;
pub mod logging;
pub mod rewrite;
pub mod ui;
pub mod upload;

#[cfg(test)]
mod mock;

pub use error::{Error, Result};
