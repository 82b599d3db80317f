// Template reference rewriting.
//
// A template refers to local images as `<folder>/<basename>[.<ext>]"`. Once
// each folder has been uploaded into its own imageset, those references are
// replaced with the service URL of the uploaded image. The folder name is
// what ties a reference to an imageset: basenames are only unique within a
// folder.
//
// Building the pattern (which folder names count as references) and
// substituting (producing new text from a folder to imageset mapping) are
// separate steps so each can be exercised on its own.

use regex::bytes::{Captures, Regex};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

use crate::api::{with_trailing_slash, IMAGE_TYPES};

/// Folder directory name to the id of the imageset holding its images.
pub type ImagesetIds = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("template refers to folder `{folder}` but no imageset was uploaded for it")]
    UnknownFolder { folder: String },

    #[error("could not build reference pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Matcher for local image references under a fixed set of folder names.
#[derive(Debug, Clone)]
pub struct ReferencePattern {
    regex: Option<Regex>,
}

impl ReferencePattern {
    /// Build a matcher for `<folder>/<basename>[.<ext>]"` where `<folder>` is
    /// one of `folder_names` and `<ext>` a recognized image extension.
    pub fn new<'a, I>(folder_names: I) -> Result<Self, RewriteError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let folders: Vec<String> = folder_names.into_iter().map(regex::escape).collect();
        if folders.is_empty() {
            return Ok(ReferencePattern { regex: None });
        }
        let extensions: Vec<&str> = IMAGE_TYPES.iter().map(|(ext, _)| *ext).collect();
        let pattern = format!(
            r#"({})/((?-u:.)*?)(\.)?((?i:{}))?""#,
            folders.join("|"),
            extensions.join("|")
        );
        debug!(%pattern, "built reference pattern");
        Ok(ReferencePattern {
            regex: Some(Regex::new(&pattern)?),
        })
    }

    /// Replace every reference in `text` with the remote image URL.
    ///
    /// Fails on the first reference whose folder has no imageset; nothing is
    /// returned in that case.
    pub fn rewrite(&self, text: &[u8], imageset_ids: &ImagesetIds, api_url: &str, project: &str) -> Result<Vec<u8>, RewriteError> {
        let regex = match &self.regex {
            Some(regex) => regex,
            None => return Ok(text.to_vec()),
        };
        let api_url = with_trailing_slash(api_url);

        let mut out = Vec::with_capacity(text.len());
        let mut last = 0;
        let mut count = 0usize;
        for caps in regex.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            out.extend_from_slice(&text[last..whole.start()]);
            out.extend_from_slice(&replacement(&caps, imageset_ids, &api_url, project)?);
            last = whole.end();
            count += 1;
        }
        out.extend_from_slice(&text[last..]);
        debug!(references = count, "rewrote template references");
        Ok(out)
    }
}

/// Replacement for one reference. The basename is copied byte for byte so
/// templates in any encoding keep their file names.
fn replacement(caps: &Captures<'_>, imageset_ids: &ImagesetIds, api_url: &str, project: &str) -> Result<Vec<u8>, RewriteError> {
    let folder = String::from_utf8_lossy(&caps[1]);
    let imageset = imageset_ids.get(folder.as_ref()).ok_or_else(|| RewriteError::UnknownFolder {
        folder: folder.to_string(),
    })?;
    let mut out = image_url_prefix(api_url, project, imageset).into_bytes();
    out.extend_from_slice(&caps[2]);
    out.extend_from_slice(b"/data\"");
    Ok(out)
}

fn image_url_prefix(api_url: &str, project: &str, imageset_id: &str) -> String {
    format!(
        "{}v0/project/{}/imagesets/{}/images/name:",
        with_trailing_slash(api_url),
        project,
        imageset_id
    )
}

/// Service URL of an uploaded image, addressed by imageset and basename.
pub fn image_url(api_url: &str, project: &str, imageset_id: &str, basename: &str) -> String {
    format!("{}{}/data", image_url_prefix(api_url, project, imageset_id), basename)
}

/// Rewrite using every folder in `imageset_ids` as a reference root.
///
/// The pattern is built from the mapping itself, so a folder missing from
/// `imageset_ids` is not recognized as a reference and its paths are left
/// as they are. To fail on such folders, build a [`ReferencePattern`] from
/// the configured folder names and call [`ReferencePattern::rewrite`].
pub fn rewrite(text: &[u8], imageset_ids: &ImagesetIds, api_url: &str, project: &str) -> Result<Vec<u8>, RewriteError> {
    ReferencePattern::new(imageset_ids.keys().map(String::as_str))?.rewrite(text, imageset_ids, api_url, project)
}

/// Receives the rewritten template for diagnostics.
pub trait TraceSink {
    fn record(&mut self, rewritten: &[u8]) -> std::io::Result<()>;
}

/// Writes the rewritten template to a file, replacing earlier contents.
pub struct FileTrace {
    path: PathBuf,
}

impl FileTrace {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileTrace { path: path.into() }
    }
}

impl TraceSink for FileTrace {
    fn record(&mut self, rewritten: &[u8]) -> std::io::Result<()> {
        fs::write(&self.path, rewritten)?;
        debug!(path = %self.path.display(), "wrote template trace");
        Ok(())
    }
}

/// Hand `rewritten` to the sink, if any. Trace failures never fail a run.
pub fn trace(sink: Option<&mut (dyn TraceSink + '_)>, rewritten: &[u8]) {
    if let Some(sink) = sink {
        if let Err(e) = sink.record(rewritten) {
            warn!(error = %e, "could not record template trace");
        }
    }
}
