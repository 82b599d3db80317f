// In-memory stand-ins for the remote service and the token endpoint, shared
// by the unit tests of the upload and collection modules.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::Read;
use std::sync::Mutex;

use serde_json::{json, Map, Value};

use crate::api::{ApiError, Collection, Dataset, Gateway, Imageset};
use crate::auth::Authenticator;

pub(crate) const API_URL: &str = "https://app.zegami.com/api/";
pub(crate) const PROJECT: &str = "proj1";

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    CreateCollection { name: String, description: Option<String>, dynamic: bool },
    UpdateCollection(Collection),
    CreateImageset(String),
    UpdateImageset { imageset_id: String, info: Value },
    CreateJoin { name: String, imageset_id: String, dataset_id: String, join_column: String },
    UploadData { dataset_id: String, name: String, bytes: Vec<u8> },
    UploadImage { imageset_id: String, name: String, mime_type: String, bytes: Vec<u8>, accepted: bool },
    UploadTemplate { collection_id: String, template: Vec<u8> },
    SetColumns { dataset_id: String, columns: Value },
}

#[derive(Default)]
pub(crate) struct MockGateway {
    calls: Mutex<Vec<Call>>,
    tokens: Mutex<Vec<String>>,
    /// Statuses returned for successive uploads of a basename before it is accepted.
    image_failures: Mutex<HashMap<String, VecDeque<u16>>>,
    imagesets: Mutex<u32>,
    pub fail_create_collection: bool,
    pub fail_data_upload: bool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next uploads of `basename` fail with `statuses`, in order.
    pub fn fail_image(self, basename: &str, statuses: &[u16]) -> Self {
        self.image_failures
            .lock()
            .unwrap()
            .insert(basename.to_string(), statuses.iter().copied().collect());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }

    /// Basenames of accepted image uploads, in upload order.
    pub fn accepted_images(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::UploadImage { name, accepted: true, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn image_attempts(&self, basename: &str) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::UploadImage { name, bytes, .. } if name == basename => Some(bytes),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn rejected(status: u16, url: &str) -> ApiError {
    ApiError::Status {
        method: "POST",
        url: url.to_string(),
        status,
        body: String::new(),
    }
}

fn read_all(mut file: File) -> Vec<u8> {
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).unwrap();
    bytes
}

impl Gateway for MockGateway {
    fn api_url(&self) -> &str {
        API_URL
    }

    fn project(&self) -> &str {
        PROJECT
    }

    fn set_token(&self, token: &str) {
        self.tokens.lock().unwrap().push(token.to_string());
    }

    fn create_collection(&self, name: &str, description: Option<&str>, dynamic: bool) -> Result<Collection, ApiError> {
        self.record(Call::CreateCollection {
            name: name.to_string(),
            description: description.map(str::to_string),
            dynamic,
        });
        if self.fail_create_collection {
            return Err(rejected(500, "collections/"));
        }
        let mut extra = Map::new();
        extra.insert("dynamic".into(), json!(dynamic));
        Ok(Collection {
            id: "coll-1".into(),
            name: name.to_string(),
            dataset_id: "ds-1".into(),
            imageset_id: if dynamic { None } else { Some("static-imageset".into()) },
            join_dataset_id: None,
            extra,
        })
    }

    fn update_collection(&self, _collection_id: &str, collection: &Collection) -> Result<Collection, ApiError> {
        self.record(Call::UpdateCollection(collection.clone()));
        Ok(collection.clone())
    }

    fn create_imageset(&self, name: &str) -> Result<Imageset, ApiError> {
        self.record(Call::CreateImageset(name.to_string()));
        let mut count = self.imagesets.lock().unwrap();
        *count += 1;
        Ok(Imageset {
            id: format!("imageset-{}", count),
            name: Some(name.to_string()),
        })
    }

    fn update_imageset(&self, imageset_id: &str, info: &Value) -> Result<Value, ApiError> {
        self.record(Call::UpdateImageset {
            imageset_id: imageset_id.to_string(),
            info: info.clone(),
        });
        Ok(json!({ "imageset": { "id": imageset_id } }))
    }

    fn create_join(&self, name: &str, imageset_id: &str, dataset_id: &str, join_column: &str) -> Result<Dataset, ApiError> {
        self.record(Call::CreateJoin {
            name: name.to_string(),
            imageset_id: imageset_id.to_string(),
            dataset_id: dataset_id.to_string(),
            join_column: join_column.to_string(),
        });
        Ok(Dataset { id: "join-1".into() })
    }

    fn upload_data(&self, dataset_id: &str, name: &str, file: File) -> Result<Value, ApiError> {
        self.record(Call::UploadData {
            dataset_id: dataset_id.to_string(),
            name: name.to_string(),
            bytes: read_all(file),
        });
        if self.fail_data_upload {
            return Err(rejected(500, "datasets/ds-1/file"));
        }
        Ok(json!({}))
    }

    fn upload_image(&self, imageset_id: &str, name: &str, file: File, mime_type: &str) -> Result<Value, ApiError> {
        let bytes = read_all(file);
        let failure = self
            .image_failures
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(VecDeque::pop_front);
        self.record(Call::UploadImage {
            imageset_id: imageset_id.to_string(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            bytes,
            accepted: failure.is_none(),
        });
        match failure {
            Some(status) => Err(rejected(status, "imagesets/images")),
            None => Ok(json!({ "image": { "name": name } })),
        }
    }

    fn upload_template(&self, collection_id: &str, template: Vec<u8>) -> Result<Value, ApiError> {
        self.record(Call::UploadTemplate {
            collection_id: collection_id.to_string(),
            template,
        });
        Ok(json!({}))
    }

    fn set_columns(&self, dataset_id: &str, columns: &Value) -> Result<Value, ApiError> {
        self.record(Call::SetColumns {
            dataset_id: dataset_id.to_string(),
            columns: columns.clone(),
        });
        Ok(columns.clone())
    }
}

/// Hands out `token-1`, `token-2`, ... or nothing when `refuse` is set.
#[derive(Default)]
pub(crate) struct MockAuth {
    issued: Mutex<u32>,
    pub refuse: bool,
}

impl MockAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        MockAuth {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn issued(&self) -> u32 {
        *self.issued.lock().unwrap()
    }
}

impl Authenticator for MockAuth {
    fn request_token(&self) -> Option<String> {
        if self.refuse {
            return None;
        }
        let mut issued = self.issued.lock().unwrap();
        *issued += 1;
        Some(format!("token-{}", issued))
    }
}
