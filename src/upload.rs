// Uploading a folder of images into an imageset.
//
// Every recognized image in the folder is attempted once the imageset is
// known; a file that fails is reported and skipped, never fatal for the
// folder. An expired token (HTTP 401) is the only failure that is retried,
// after asking the authenticator for a fresh one.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::api::{image_mime_type, ApiError, Gateway};
use crate::auth::Authenticator;
use crate::ui;

/// Attempts per file, counting the first one.
pub const UPLOAD_ATTEMPTS: u32 = 3;

/// Where a folder's images go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagesetTarget {
    /// Create a fresh imageset with this name.
    Create(String),
    /// Attach to an imageset that already exists.
    Existing(String),
}

/// Why a single image was abandoned.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("could not open file: {0}")]
    Open(#[from] io::Error),

    #[error(transparent)]
    Rejected(ApiError),

    #[error("still unauthorized after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ApiError },

    #[error("re-authentication failed after: {0}")]
    Reauthenticate(ApiError),
}

#[derive(Debug)]
pub struct FailedImage {
    pub basename: String,
    pub error: ImageError,
}

/// Outcome of uploading one folder.
#[derive(Debug)]
pub struct FolderUpload {
    pub imageset_id: String,
    pub uploaded: Vec<String>,
    pub failed: Vec<FailedImage>,
    /// Entries ignored because they are not recognized images.
    pub skipped: usize,
}

/// A folder entry that qualifies for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub path: PathBuf,
    pub basename: String,
    pub mime_type: &'static str,
}

/// Split a file name at its last dot. `None` when there is no extension or
/// nothing in front of it.
pub fn split_file_name(file_name: &str) -> Option<(&str, &str)> {
    file_name.rsplit_once('.').filter(|(base, _)| !base.is_empty())
}

/// List the uploadable images of `folder` in file name order, along with the
/// number of entries left out.
pub fn list_images(folder: &Path) -> io::Result<(Vec<ImageFile>, usize)> {
    let mut entries = fs::read_dir(folder)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    let mut images = Vec::new();
    let mut skipped = 0;
    for entry in entries {
        let path = entry.path();
        let image = entry
            .file_name()
            .to_str()
            .filter(|_| path.is_file())
            .and_then(split_file_name)
            .and_then(|(base, ext)| image_mime_type(ext).map(|mime| (base.to_string(), mime)));
        match image {
            Some((basename, mime_type)) => images.push(ImageFile {
                path,
                basename,
                mime_type,
            }),
            None => {
                debug!(path = %path.display(), "skipping entry");
                skipped += 1;
            }
        }
    }
    Ok((images, skipped))
}

/// Uploads folders of images through a gateway, refreshing its token from
/// `auth` when the service reports it expired.
pub struct ImageUploader<'a> {
    gateway: &'a dyn Gateway,
    auth: &'a dyn Authenticator,
    attempts: u32,
    show_progress: bool,
}

impl<'a> ImageUploader<'a> {
    pub fn new(gateway: &'a dyn Gateway, auth: &'a dyn Authenticator) -> Self {
        ImageUploader {
            gateway,
            auth,
            attempts: UPLOAD_ATTEMPTS,
            show_progress: false,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Upload every recognized image in `folder` into the target imageset.
    ///
    /// Only resolving the imageset or listing the folder can fail; per file
    /// problems end up in `FolderUpload::failed`.
    pub fn upload_folder(&self, folder: &Path, target: ImagesetTarget) -> Result<FolderUpload, crate::Error> {
        let imageset_id = match target {
            ImagesetTarget::Create(name) => {
                let imageset = self.gateway.create_imageset(&name)?;
                info!(name = %name, id = %imageset.id, "created imageset");
                imageset.id
            }
            ImagesetTarget::Existing(id) => id,
        };

        let (images, skipped) = list_images(folder).map_err(|source| crate::Error::Io {
            context: format!("could not list image folder {}", folder.display()),
            source,
        })?;

        let progress = ui::folder_progress(self.show_progress, images.len() as u64, &folder.display().to_string());
        let mut outcome = FolderUpload {
            imageset_id,
            uploaded: Vec::new(),
            failed: Vec::new(),
            skipped,
        };
        for image in images {
            progress.set_message(image.basename.clone());
            match self.upload_image(&outcome.imageset_id, &image) {
                Ok(()) => {
                    info!(imageset = %outcome.imageset_id, file = %image.basename, "uploaded image");
                    outcome.uploaded.push(image.basename);
                }
                Err(e) => {
                    error!(imageset = %outcome.imageset_id, file = %image.basename, error = %e, "upload failed");
                    outcome.failed.push(FailedImage {
                        basename: image.basename,
                        error: e,
                    });
                }
            }
            progress.inc(1);
        }
        progress.finish_and_clear();
        Ok(outcome)
    }

    /// Upload a single file. The file is opened again for every attempt so a
    /// retry always sends the whole content.
    fn upload_image(&self, imageset_id: &str, image: &ImageFile) -> Result<(), ImageError> {
        let mut attempts_left = self.attempts;
        loop {
            let file = File::open(&image.path)?;
            let err = match self.gateway.upload_image(imageset_id, &image.basename, file, image.mime_type) {
                Ok(_) => return Ok(()),
                Err(e) => e,
            };
            if !err.is_unauthorized() {
                return Err(ImageError::Rejected(err));
            }

            // Every 401 replaces the token, the last one included.
            match self.auth.request_token() {
                Some(token) => self.gateway.set_token(&token),
                None => return Err(ImageError::Reauthenticate(err)),
            }
            attempts_left -= 1;
            warn!(file = %image.basename, attempts_left, error = %err, "authorization expired");
            if attempts_left == 0 {
                return Err(ImageError::Exhausted {
                    attempts: self.attempts,
                    last: err,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{JPEG_TYPE, PNG_TYPE};
    use crate::mock::{Call, MockAuth, MockGateway};

    fn folder_with(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, bytes) in files {
            std::fs::write(dir.path().join(name), bytes).unwrap();
        }
        dir
    }

    #[test]
    fn split_uses_last_dot() {
        assert_eq!(split_file_name("acme.png"), Some(("acme", "png")));
        assert_eq!(split_file_name("acme.v2.JPG"), Some(("acme.v2", "JPG")));
        assert_eq!(split_file_name("README"), None);
        assert_eq!(split_file_name(".png"), None);
    }

    #[test]
    fn uploads_recognized_extensions_with_their_mime_type() {
        let dir = folder_with(&[
            ("a.png", "a"),
            ("b.JPG", "b"),
            ("c.jpeg", "c"),
            ("d.gif", "d"),
            ("notes.txt", "e"),
            ("noext", "f"),
        ]);
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();
        let gateway = MockGateway::new();
        let auth = MockAuth::new();

        let outcome = ImageUploader::new(&gateway, &auth)
            .upload_folder(dir.path(), ImagesetTarget::Create("logos".into()))
            .unwrap();

        assert_eq!(outcome.imageset_id, "imageset-1");
        assert_eq!(outcome.uploaded, vec!["a", "b", "c"]);
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.skipped, 4);

        let uploads: Vec<(String, String)> = gateway
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::UploadImage { name, mime_type, .. } => Some((name, mime_type)),
                _ => None,
            })
            .collect();
        assert_eq!(
            uploads,
            vec![
                ("a".to_string(), PNG_TYPE.to_string()),
                ("b".to_string(), JPEG_TYPE.to_string()),
                ("c".to_string(), JPEG_TYPE.to_string()),
            ]
        );
        assert_eq!(gateway.calls()[0], Call::CreateImageset("logos".into()));
    }

    #[test]
    fn existing_imageset_is_reused() {
        let dir = folder_with(&[("a.png", "a")]);
        let gateway = MockGateway::new();
        let auth = MockAuth::new();

        let outcome = ImageUploader::new(&gateway, &auth)
            .upload_folder(dir.path(), ImagesetTarget::Existing("static".into()))
            .unwrap();

        assert_eq!(outcome.imageset_id, "static");
        assert!(!gateway.calls().iter().any(|c| matches!(c, Call::CreateImageset(_))));
        match &gateway.calls()[0] {
            Call::UploadImage { imageset_id, .. } => assert_eq!(imageset_id, "static"),
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[test]
    fn empty_folder_still_resolves_imageset() {
        let dir = folder_with(&[]);
        let gateway = MockGateway::new();
        let auth = MockAuth::new();

        let outcome = ImageUploader::new(&gateway, &auth)
            .upload_folder(dir.path(), ImagesetTarget::Create("empty".into()))
            .unwrap();

        assert_eq!(outcome.imageset_id, "imageset-1");
        assert!(gateway.image_attempts("anything").is_empty());
        assert_eq!(gateway.calls(), vec![Call::CreateImageset("empty".into())]);
    }

    #[test]
    fn two_expired_tokens_then_success() {
        let dir = folder_with(&[("acme.png", "full image content")]);
        let gateway = MockGateway::new().fail_image("acme", &[401, 401]);
        let auth = MockAuth::new();

        let outcome = ImageUploader::new(&gateway, &auth)
            .upload_folder(dir.path(), ImagesetTarget::Create("logos".into()))
            .unwrap();

        assert_eq!(outcome.uploaded, vec!["acme"]);
        assert!(outcome.failed.is_empty());
        assert_eq!(gateway.accepted_images(), vec!["acme"]);
        assert_eq!(auth.issued(), 2);
        assert_eq!(gateway.tokens(), vec!["token-1", "token-2"]);

        // Every retry sends the complete file.
        let attempts = gateway.image_attempts("acme");
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|bytes| bytes.as_slice() == b"full image content"));
    }

    #[test]
    fn exhausted_retries_skip_to_next_file() {
        let dir = folder_with(&[("a.png", "a"), ("b.png", "b")]);
        let gateway = MockGateway::new().fail_image("a", &[401, 401, 401, 401]);
        let auth = MockAuth::new();

        let outcome = ImageUploader::new(&gateway, &auth)
            .upload_folder(dir.path(), ImagesetTarget::Create("logos".into()))
            .unwrap();

        assert_eq!(outcome.uploaded, vec!["b"]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].basename, "a");
        assert!(matches!(outcome.failed[0].error, ImageError::Exhausted { attempts: 3, .. }));
        assert_eq!(gateway.image_attempts("a").len(), UPLOAD_ATTEMPTS as usize);
        assert_eq!(gateway.accepted_images(), vec!["b"]);

        // Every rejection swaps the token, so `b` starts on a fresh one.
        assert_eq!(auth.issued(), 3);
        assert_eq!(gateway.tokens(), vec!["token-1", "token-2", "token-3"]);
    }

    #[test]
    fn single_attempt_still_replaces_rejected_token() {
        let dir = folder_with(&[("a.png", "a")]);
        let gateway = MockGateway::new().fail_image("a", &[401]);
        let auth = MockAuth::new();

        let outcome = ImageUploader::new(&gateway, &auth)
            .with_attempts(1)
            .upload_folder(dir.path(), ImagesetTarget::Create("logos".into()))
            .unwrap();

        assert!(matches!(outcome.failed[0].error, ImageError::Exhausted { attempts: 1, .. }));
        assert_eq!(gateway.image_attempts("a").len(), 1);
        assert_eq!(auth.issued(), 1);
        assert_eq!(gateway.tokens(), vec!["token-1"]);
    }

    #[test]
    fn other_failures_are_not_retried() {
        let dir = folder_with(&[("a.png", "a"), ("b.png", "b")]);
        let gateway = MockGateway::new().fail_image("a", &[500]);
        let auth = MockAuth::new();

        let outcome = ImageUploader::new(&gateway, &auth)
            .upload_folder(dir.path(), ImagesetTarget::Create("logos".into()))
            .unwrap();

        assert_eq!(gateway.image_attempts("a").len(), 1);
        assert_eq!(auth.issued(), 0);
        assert!(matches!(outcome.failed[0].error, ImageError::Rejected(_)));
        assert_eq!(outcome.uploaded, vec!["b"]);
    }

    #[test]
    fn refused_reauthentication_abandons_file() {
        let dir = folder_with(&[("a.png", "a")]);
        let gateway = MockGateway::new().fail_image("a", &[401]);
        let auth = MockAuth::refusing();

        let outcome = ImageUploader::new(&gateway, &auth)
            .upload_folder(dir.path(), ImagesetTarget::Create("logos".into()))
            .unwrap();

        assert!(outcome.uploaded.is_empty());
        assert!(matches!(outcome.failed[0].error, ImageError::Reauthenticate(_)));
        assert_eq!(gateway.image_attempts("a").len(), 1);
        assert!(gateway.tokens().is_empty());
    }

    #[test]
    fn missing_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = MockGateway::new();
        let auth = MockAuth::new();

        let err = ImageUploader::new(&gateway, &auth)
            .upload_folder(&dir.path().join("absent"), ImagesetTarget::Existing("x".into()))
            .unwrap_err();
        assert!(err.to_string().contains("could not list image folder"));
    }
}
