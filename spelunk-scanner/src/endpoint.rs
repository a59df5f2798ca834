use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use url::Url;

pub type Headers = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRequest {
    pub method: String,
    pub body: String,
    pub headers: Headers,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointResponse {
    pub code: u16,
    pub body: String,
    pub headers: Headers,
}

/// A request/response pair observed while exploring the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Path and query of the request URL, without scheme or host.
    pub uri: String,
    pub request: EndpointRequest,
    pub response: EndpointResponse,
}

impl Endpoint {
    pub fn new(url: &str, request: EndpointRequest, response: EndpointResponse) -> Self {
        Self {
            uri: request_uri(url),
            request,
            response,
        }
    }

    /// Deduplication key: two endpoints with the same URI and request body are the same endpoint.
    pub fn identity(&self) -> String {
        format!("{}@{}", self.uri, self.request.body)
    }
}

/// Reduce a full URL to its request URI (path plus query).
pub fn request_uri(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let path = if parsed.path().is_empty() {
                "/"
            } else {
                parsed.path()
            };
            match parsed.query() {
                Some(query) => format!("{}?{}", path, query),
                None => path.to_string(),
            }
        }
        Err(_) => url.to_string(),
    }
}

/// Append-only endpoint inventory shared between the recorder and its owner.
#[derive(Debug, Clone, Default)]
pub struct EndpointSet {
    inner: Arc<Mutex<HashMap<String, Endpoint>>>,
}

impl EndpointSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when an endpoint with the same identity was already recorded.
    pub async fn insert(&self, endpoint: Endpoint) -> bool {
        let mut endpoints = self.inner.lock().await;
        let key = endpoint.identity();
        if endpoints.contains_key(&key) {
            return false;
        }
        endpoints.insert(key, endpoint);
        true
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Copy of the current contents, sorted by URI then request body.
    pub async fn snapshot(&self) -> Vec<Endpoint> {
        let endpoints = self.inner.lock().await;
        let mut snapshot: Vec<Endpoint> = endpoints.values().cloned().collect();
        snapshot.sort_by(|a, b| {
            a.uri
                .cmp(&b.uri)
                .then_with(|| a.request.body.cmp(&b.request.body))
        });
        snapshot
    }
}
