// Collection description loaded from YAML.
//
//    collection_name: OSI collection
//    collection_description: Open source initiative members
//    data_file: osidata.tsv
//    image_folders: [logos]
//    zegs: true
//    xslt_file: osizeg.xslt
//    columns_file: columns.json
//    dynamic_custom_options: { tile_size: 200 }
//    image_column: Company

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Join column used when `image_column` is not given.
pub const DEFAULT_IMAGE_COLUMN: &str = "id";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("`{0}` must not be empty")]
    Empty(&'static str),

    #[error("`xslt_file` is required when `zegs` is true")]
    MissingTemplate,

    #[error("non-template collections take exactly one image folder, got {0}")]
    SingleFolder(usize),

    #[error("image folder {0} has no directory name")]
    UnnamedFolder(PathBuf),

    #[error("image folders {first} and {second} share the directory name `{name}`")]
    DuplicateFolder { name: String, first: PathBuf, second: PathBuf },
}

/// File layout as written by users. See [`CollectionConfig`] for the
/// validated form.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    collection_name: String,
    #[serde(default)]
    collection_description: Option<String>,
    data_file: PathBuf,
    #[serde(default)]
    image_folders: serde_yaml::Value,
    #[serde(default)]
    xslt_file: Option<PathBuf>,
    #[serde(default)]
    columns_file: Option<PathBuf>,
    #[serde(default)]
    zegs: bool,
    #[serde(default)]
    dynamic_custom_options: Option<Value>,
    #[serde(default)]
    image_column: Option<String>,
    // Accepted so older descriptions still load; never applied.
    #[serde(default)]
    path_replace: Option<serde_yaml::Value>,
}

/// One local folder of images, correlated with the template through its
/// directory name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFolder {
    pub path: PathBuf,
    pub name: String,
}

impl ImageFolder {
    pub fn new(path: PathBuf) -> Result<Self, ConfigError> {
        let name = directory_name(&path).ok_or_else(|| ConfigError::UnnamedFolder(path.clone()))?;
        Ok(ImageFolder { path, name })
    }
}

/// Final component of a folder path, ignoring a trailing separator.
pub fn directory_name(path: &Path) -> Option<String> {
    path.file_name().and_then(|name| name.to_str()).map(str::to_string)
}

/// How the images are attached to the collection.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionMode {
    /// One imageset per folder, referenced from a rewritten template.
    Template {
        xslt_file: PathBuf,
        dynamic_custom_options: Option<Value>,
    },
    /// A single folder joined to the data on `image_column`.
    SingleImage { image_column: String },
}

/// Validated collection description with paths resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionConfig {
    pub name: String,
    pub description: Option<String>,
    pub data_file: PathBuf,
    pub image_folders: Vec<ImageFolder>,
    pub columns_file: Option<PathBuf>,
    pub mode: CollectionMode,
}

impl CollectionConfig {
    /// Read and validate a description. Relative paths are taken from the
    /// directory holding the file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Self::from_yaml(&text, base)
    }

    pub fn from_yaml(text: &str, base: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(text)?;
        Self::from_raw(raw, base)
    }

    fn from_raw(raw: RawConfig, base: &Path) -> Result<Self, ConfigError> {
        if raw.collection_name.trim().is_empty() {
            return Err(ConfigError::Empty("collection_name"));
        }
        if raw.data_file.as_os_str().is_empty() {
            return Err(ConfigError::Empty("data_file"));
        }
        if raw.path_replace.is_some() {
            warn!("path_replace is not supported; ignoring");
        }

        // Anything other than a list of paths means no folders.
        let folder_paths: Vec<PathBuf> = match raw.image_folders {
            serde_yaml::Value::Sequence(items) => items
                .into_iter()
                .filter_map(|item| item.as_str().map(PathBuf::from))
                .collect(),
            _ => Vec::new(),
        };
        let image_folders = folder_paths
            .into_iter()
            .map(|p| ImageFolder::new(base.join(p)))
            .collect::<Result<Vec<_>, _>>()?;
        check_unique_names(&image_folders)?;

        let mode = if raw.zegs {
            let xslt_file = raw.xslt_file.ok_or(ConfigError::MissingTemplate)?;
            CollectionMode::Template {
                xslt_file: base.join(xslt_file),
                dynamic_custom_options: raw.dynamic_custom_options,
            }
        } else {
            if image_folders.len() != 1 {
                return Err(ConfigError::SingleFolder(image_folders.len()));
            }
            CollectionMode::SingleImage {
                image_column: raw
                    .image_column
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| DEFAULT_IMAGE_COLUMN.to_string()),
            }
        };

        Ok(CollectionConfig {
            name: raw.collection_name,
            description: raw.collection_description,
            data_file: base.join(raw.data_file),
            image_folders,
            columns_file: raw.columns_file.map(|p| base.join(p)),
            mode,
        })
    }

    pub fn is_template(&self) -> bool {
        matches!(self.mode, CollectionMode::Template { .. })
    }
}

fn check_unique_names(folders: &[ImageFolder]) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for (i, folder) in folders.iter().enumerate() {
        if !seen.insert(folder.name.as_str()) {
            let first = folders[..i]
                .iter()
                .find(|f| f.name == folder.name)
                .map(|f| f.path.clone())
                .unwrap_or_default();
            return Err(ConfigError::DuplicateFolder {
                name: folder.name.clone(),
                first,
                second: folder.path.clone(),
            });
        }
    }
    Ok(())
}
