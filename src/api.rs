// API client module: a small blocking HTTP client for the collection
// service. Every call is synchronous; the run is a straight sequence of
// requests so there is nothing to gain from an async runtime here.

use reqwest::blocking::{multipart, Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::File;
use std::sync::RwLock;
use thiserror::Error;
use tracing::debug;

/// Mimetype used for the tabular data upload.
pub const TSV_TYPE: &str = "text/tab-separated-values";
/// Mimetype used for the template upload.
pub const XSLT_TYPE: &str = "application/xml";
pub const PNG_TYPE: &str = "image/png";
pub const JPEG_TYPE: &str = "image/jpeg";

/// Recognized image extensions (lowercase) and the mimetype sent for each.
pub const IMAGE_TYPES: &[(&str, &str)] = &[("jpg", JPEG_TYPE), ("jpeg", JPEG_TYPE), ("png", PNG_TYPE)];

/// Looks up the upload mimetype for an extension, ignoring case.
pub fn image_mime_type(extension: &str) -> Option<&'static str> {
    IMAGE_TYPES
        .iter()
        .find(|(ext, _)| ext.eq_ignore_ascii_case(extension))
        .map(|(_, mime)| *mime)
}

/// Failure of a single gateway call.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response from {url}: {reason}")]
    Response { url: String, reason: String },
}

impl ApiError {
    /// The service rejected the bearer token.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Status { status: 401, .. })
    }
}

/// Bearer token shared by every request of a gateway. A refresh swaps the
/// whole value; readers always see either the old or the new token.
#[derive(Debug, Default)]
pub struct Credential {
    slot: RwLock<String>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Credential {
            slot: RwLock::new(token.into()),
        }
    }

    pub fn current(&self) -> String {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn replace(&self, token: impl Into<String>) {
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = token.into();
    }
}

/// Collection record as returned by the service. Fields this tool does not
/// touch are kept in `extra` so an update sends back the full representation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub dataset_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imageset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_dataset_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Imageset {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Dataset {
    pub id: String,
}

/// Operations the collection workflow needs from the remote service.
///
/// File bodies are passed as owned handles so an implementation can stream
/// them; callers open a fresh handle for every call.
pub trait Gateway {
    fn api_url(&self) -> &str;
    fn project(&self) -> &str;

    /// Swap the bearer token used by all subsequent calls.
    fn set_token(&self, token: &str);

    fn create_collection(&self, name: &str, description: Option<&str>, dynamic: bool) -> Result<Collection, ApiError>;
    fn update_collection(&self, collection_id: &str, collection: &Collection) -> Result<Collection, ApiError>;
    fn create_imageset(&self, name: &str) -> Result<Imageset, ApiError>;
    /// Merge `info` into the current imageset representation and store it.
    fn update_imageset(&self, imageset_id: &str, info: &Value) -> Result<Value, ApiError>;
    fn create_join(&self, name: &str, imageset_id: &str, dataset_id: &str, join_column: &str) -> Result<Dataset, ApiError>;
    fn upload_data(&self, dataset_id: &str, name: &str, file: File) -> Result<Value, ApiError>;
    fn upload_image(&self, imageset_id: &str, name: &str, file: File, mime_type: &str) -> Result<Value, ApiError>;
    fn upload_template(&self, collection_id: &str, template: Vec<u8>) -> Result<Value, ApiError>;
    fn set_columns(&self, dataset_id: &str, columns: &Value) -> Result<Value, ApiError>;
}

/// Reqwest backed gateway. Holds the client, the API root, the project the
/// collection lives in and the current bearer token.
pub struct ApiClient {
    client: Client,
    api_url: String,
    project: String,
    credential: Credential,
}

impl ApiClient {
    pub fn new(api_url: &str, project: &str, token: &str) -> Result<Self, ApiError> {
        let client = Client::builder().build()?;
        Ok(ApiClient {
            client,
            api_url: with_trailing_slash(api_url),
            project: project.to_string(),
            credential: Credential::new(token),
        })
    }

    fn project_url(&self, path: &str) -> String {
        format!("{}v0/project/{}/{}", self.api_url, self.project, path)
    }

    /// Authorization header carrying the current token.
    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let val = format!("Bearer {}", self.credential.current());
        if let Ok(val) = HeaderValue::from_str(&val) {
            headers.insert(AUTHORIZATION, val);
        }
        headers
    }

    /// Send a request and decode the JSON body, turning non-success statuses
    /// into `ApiError::Status` with the server's response text.
    fn send(&self, method: &'static str, url: &str, req: RequestBuilder) -> Result<Value, ApiError> {
        debug!(method, url, "sending request");
        let res = req.headers(self.auth_headers()).send()?;
        check_status(method, url, res)?
            .json()
            .map_err(|e| ApiError::Response {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    fn post_json(&self, url: &str, body: &Value) -> Result<Value, ApiError> {
        self.send("POST", url, self.client.post(url).json(body))
    }

    fn put_json(&self, url: &str, body: &Value) -> Result<Value, ApiError> {
        self.send("PUT", url, self.client.put(url).json(body))
    }

    fn get_json(&self, url: &str) -> Result<Value, ApiError> {
        self.send("GET", url, self.client.get(url))
    }

    fn post_file(&self, url: &str, name: &str, file: File, mime_type: &str) -> Result<Value, ApiError> {
        let part = multipart::Part::reader(file)
            .file_name(name.to_string())
            .mime_str(mime_type)?;
        let form = multipart::Form::new().part("file", part);
        self.send("POST", url, self.client.post(url).multipart(form))
    }
}

/// Endpoint paths are appended directly to the API root.
pub fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

fn check_status(method: &'static str, url: &str, res: Response) -> Result<Response, ApiError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status().as_u16();
    let body = res.text().unwrap_or_default();
    Err(ApiError::Status {
        method,
        url: url.to_string(),
        status,
        body,
    })
}

/// Pull `field` out of a response envelope such as `{"collection": {...}}`.
fn take_field<T: DeserializeOwned>(mut body: Value, field: &str, url: &str) -> Result<T, ApiError> {
    let inner = body.get_mut(field).map(Value::take).ok_or_else(|| ApiError::Response {
        url: url.to_string(),
        reason: format!("missing `{}`", field),
    })?;
    serde_json::from_value(inner).map_err(|e| ApiError::Response {
        url: url.to_string(),
        reason: format!("malformed `{}`: {}", field, e),
    })
}

/// Shallow merge of `update` into `target`, as a JSON object update.
pub fn merge_object(target: &mut Value, update: &Value) {
    if let (Some(target), Some(update)) = (target.as_object_mut(), update.as_object()) {
        for (key, value) in update {
            target.insert(key.clone(), value.clone());
        }
    }
}

impl Gateway for ApiClient {
    fn api_url(&self) -> &str {
        &self.api_url
    }

    fn project(&self) -> &str {
        &self.project
    }

    fn set_token(&self, token: &str) {
        self.credential.replace(token);
    }

    fn create_collection(&self, name: &str, description: Option<&str>, dynamic: bool) -> Result<Collection, ApiError> {
        let url = self.project_url("collections/");
        let info = json!({
            "name": name,
            "description": description.unwrap_or(""),
            "dynamic": dynamic,
        });
        take_field(self.post_json(&url, &info)?, "collection", &url)
    }

    fn update_collection(&self, collection_id: &str, collection: &Collection) -> Result<Collection, ApiError> {
        let url = self.project_url(&format!("collections/{}", collection_id));
        let info = serde_json::to_value(collection).map_err(|e| ApiError::Response {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        take_field(self.put_json(&url, &info)?, "collection", &url)
    }

    fn create_imageset(&self, name: &str) -> Result<Imageset, ApiError> {
        let url = self.project_url("imagesets/");
        take_field(self.post_json(&url, &json!({ "name": name }))?, "imageset", &url)
    }

    fn update_imageset(&self, imageset_id: &str, info: &Value) -> Result<Value, ApiError> {
        let url = self.project_url(&format!("imagesets/{}", imageset_id));
        let mut current: Value = take_field(self.get_json(&url)?, "imageset", &url)?;
        merge_object(&mut current, info);
        self.put_json(&url, &current)
    }

    fn create_join(&self, name: &str, imageset_id: &str, dataset_id: &str, join_column: &str) -> Result<Dataset, ApiError> {
        let url = self.project_url("datasets/");
        let info = json!({
            "name": name,
            "source": {
                "imageset_id": imageset_id,
                "dataset_id": dataset_id,
                "imageset_name_join_to_dataset": { "dataset_column": join_column },
            },
        });
        take_field(self.post_json(&url, &info)?, "dataset", &url)
    }

    fn upload_data(&self, dataset_id: &str, name: &str, file: File) -> Result<Value, ApiError> {
        let url = self.project_url(&format!("datasets/{}/file", dataset_id));
        self.post_file(&url, name, file, TSV_TYPE)
    }

    fn upload_image(&self, imageset_id: &str, name: &str, file: File, mime_type: &str) -> Result<Value, ApiError> {
        let url = self.project_url(&format!("imagesets/{}/images", imageset_id));
        self.post_file(&url, name, file, mime_type)
    }

    fn upload_template(&self, collection_id: &str, template: Vec<u8>) -> Result<Value, ApiError> {
        let url = self.project_url(&format!("collections/{}/zegx", collection_id));
        let req = self.client.put(&url).header(CONTENT_TYPE, XSLT_TYPE).body(template);
        self.send("PUT", &url, req)
    }

    fn set_columns(&self, dataset_id: &str, columns: &Value) -> Result<Value, ApiError> {
        let url = self.project_url(&format!("datasets/{}/columns", dataset_id));
        self.put_json(&url, columns)
    }
}
