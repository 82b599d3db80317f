// Collection orchestration: create the collection, upload its data, attach
// the images and, for template collections, push the rewritten template.
//
// Creation and data upload failures end the run, as does an unreadable or
// unresolvable template. Individual images that fail are only reported.

use std::fs::{self, File};
use std::path::Path;

use serde_json::{json, Value};
use tracing::info;

use crate::api::{Collection, Gateway};
use crate::auth::Authenticator;
use crate::config::{CollectionConfig, CollectionMode, ImageFolder};
use crate::error::{Error, Result};
use crate::rewrite::{self, ImagesetIds, ReferencePattern, TraceSink};
use crate::upload::{FolderUpload, ImageUploader, ImagesetTarget};

/// Source settings applied to the imageset of a single-image collection.
pub fn single_image_source() -> Value {
    json!({
        "source": {
            "deepzoom": {
                "midlevel": 10,
                "optimize": true,
                "overlap": 1,
                "quality": 95,
            },
        },
    })
}

/// What a run produced.
#[derive(Debug)]
pub struct CollectionReport {
    pub collection: Collection,
    pub folders: Vec<FolderUpload>,
}

impl CollectionReport {
    pub fn uploaded(&self) -> usize {
        self.folders.iter().map(|f| f.uploaded.len()).sum()
    }

    pub fn failed(&self) -> usize {
        self.folders.iter().map(|f| f.failed.len()).sum()
    }
}

pub struct CollectionCreator<'a> {
    gateway: &'a dyn Gateway,
    auth: &'a dyn Authenticator,
    show_progress: bool,
    trace: Option<&'a mut dyn TraceSink>,
}

impl<'a> CollectionCreator<'a> {
    pub fn new(gateway: &'a dyn Gateway, auth: &'a dyn Authenticator) -> Self {
        CollectionCreator {
            gateway,
            auth,
            show_progress: false,
            trace: None,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Receive a copy of the rewritten template.
    pub fn with_trace(mut self, sink: &'a mut dyn TraceSink) -> Self {
        self.trace = Some(sink);
        self
    }

    pub fn run(&mut self, config: &CollectionConfig) -> Result<CollectionReport> {
        let collection = self
            .gateway
            .create_collection(&config.name, config.description.as_deref(), config.is_template())?;
        info!(id = %collection.id, name = %collection.name, "created collection");

        self.upload_data(&collection, &config.data_file)?;

        let (collection, folders) = match &config.mode {
            CollectionMode::Template {
                xslt_file,
                dynamic_custom_options,
            } => self.attach_template(collection, &config.image_folders, xslt_file, dynamic_custom_options.as_ref())?,
            CollectionMode::SingleImage { image_column } => {
                self.attach_single(collection, &config.image_folders, image_column)?
            }
        };

        if let Some(columns_file) = &config.columns_file {
            self.set_columns(&collection, columns_file)?;
        }

        Ok(CollectionReport { collection, folders })
    }

    fn upload_data(&self, collection: &Collection, data_file: &Path) -> Result<()> {
        let file = File::open(data_file).map_err(|source| Error::Io {
            context: format!("could not open data file {}", data_file.display()),
            source,
        })?;
        let name = data_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| data_file.display().to_string());
        self.gateway.upload_data(&collection.dataset_id, &name, file)?;
        info!(file = %data_file.display(), "data file uploaded");
        Ok(())
    }

    fn uploader(&self) -> ImageUploader<'a> {
        ImageUploader::new(self.gateway, self.auth).with_progress(self.show_progress)
    }

    /// One imageset per folder, then the template rewritten against them.
    fn attach_template(
        &mut self,
        mut collection: Collection,
        folders: &[ImageFolder],
        xslt_file: &Path,
        dynamic_custom_options: Option<&Value>,
    ) -> Result<(Collection, Vec<FolderUpload>)> {
        let uploader = self.uploader();
        let mut imageset_ids = ImagesetIds::new();
        let mut uploads = Vec::with_capacity(folders.len());
        for folder in folders {
            let upload = uploader.upload_folder(&folder.path, ImagesetTarget::Create(folder.name.clone()))?;
            imageset_ids.insert(folder.name.clone(), upload.imageset_id.clone());
            uploads.push(upload);
        }

        let template = fs::read(xslt_file).map_err(|source| Error::Io {
            context: format!("could not read template {}", xslt_file.display()),
            source,
        })?;
        let pattern = ReferencePattern::new(folders.iter().map(|f| f.name.as_str()))?;
        let rewritten = pattern.rewrite(&template, &imageset_ids, self.gateway.api_url(), self.gateway.project())?;
        rewrite::trace(self.trace.as_deref_mut(), &rewritten);

        self.gateway.upload_template(&collection.id, rewritten)?;
        info!(collection = %collection.id, "uploaded zegx template");

        if let Some(options) = dynamic_custom_options {
            collection.extra.insert("dynamic_custom_options".into(), options.clone());
        }
        let related: Vec<&str> = uploads.iter().map(|u| u.imageset_id.as_str()).collect();
        collection.extra.insert("related_imageset_ids".into(), json!(related));
        let collection = self.gateway.update_collection(&collection.id, &collection)?;
        info!(collection = %collection.id, imagesets = related.len(), "updated collection");

        Ok((collection, uploads))
    }

    /// Images go into the collection's own imageset, joined to the data on
    /// `image_column`.
    fn attach_single(
        &self,
        mut collection: Collection,
        folders: &[ImageFolder],
        image_column: &str,
    ) -> Result<(Collection, Vec<FolderUpload>)> {
        let imageset_id = collection.imageset_id.clone().ok_or(Error::MissingImageset)?;
        let folder = folders.first().ok_or(Error::Config(crate::config::ConfigError::SingleFolder(0)))?;

        self.gateway.update_imageset(&imageset_id, &single_image_source())?;
        info!(imageset = %imageset_id, "configured imageset source");

        let upload = self
            .uploader()
            .upload_folder(&folder.path, ImagesetTarget::Existing(imageset_id.clone()))?;

        let join_name = format!("Join for {}", collection.name);
        let join = self
            .gateway
            .create_join(&join_name, &imageset_id, &collection.dataset_id, image_column)?;
        info!(join = %join.id, column = %image_column, "created join dataset");

        collection.join_dataset_id = Some(join.id);
        let collection = self.gateway.update_collection(&collection.id, &collection)?;
        Ok((collection, vec![upload]))
    }

    fn set_columns(&self, collection: &Collection, columns_file: &Path) -> Result<()> {
        let raw = fs::read(columns_file).map_err(|source| Error::Io {
            context: format!("could not read columns file {}", columns_file.display()),
            source,
        })?;
        let columns: Value = serde_json::from_slice(&raw).map_err(|source| Error::Columns {
            path: columns_file.display().to_string(),
            source,
        })?;
        self.gateway.set_columns(&collection.dataset_id, &columns)?;
        info!(dataset = %collection.dataset_id, "set column schema");
        Ok(())
    }
}
