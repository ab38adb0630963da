// tests/common/mod.rs - Scripted in-memory transport shared by the integration tests
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use orion_rs::config::Config;
use orion_rs::http::{HttpRequest, HttpResponse, HttpTransport};
use orion_rs::{BackendError, BoundedHttpClient, NanoDlpBackend};

pub const BASE_URL: &str = "http://printer.test";

#[derive(Debug, Clone)]
pub enum Reply {
    Json(serde_json::Value),
    Bytes(&'static [u8]),
    Status(u16),
    /// Never completes.
    Hang,
    /// Answers with the inner reply after a delay.
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    pub fn delayed(delay: Duration, reply: Reply) -> Self {
        Reply::Delayed(delay, Box::new(reply))
    }
}

/// Answers requests by path. A path can hold a queue of replies; the last one
/// is repeated once the queue runs dry. Unknown paths get a 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    counts: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, path: &str, reply: Reply) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), VecDeque::from([reply]));
    }

    pub fn on_sequence(&self, path: &str, replies: Vec<Reply>) {
        self.routes.lock().unwrap().insert(path.to_string(), replies.into());
    }

    pub fn count(&self, path: &str) -> usize {
        self.counts.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self, path: &str) -> Option<Reply> {
        let mut routes = self.routes.lock().unwrap();
        let queue = routes.get_mut(path)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

fn path_of(url: &str) -> &str {
    let path = url.strip_prefix(BASE_URL).unwrap_or(url);
    path.split('?').next().unwrap_or(path)
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, BackendError> {
        let path = path_of(&request.url).to_string();
        *self.counts.lock().unwrap().entry(path.clone()).or_default() += 1;
        self.requests.lock().unwrap().push(request.clone());

        let mut reply = self.next_reply(&path);
        while let Some(Reply::Delayed(delay, inner)) = reply {
            tokio::time::sleep(delay).await;
            reply = Some(*inner);
        }
        let (status, body) = match reply {
            Some(Reply::Json(value)) => (200, Bytes::from(value.to_string())),
            Some(Reply::Bytes(bytes)) => (200, Bytes::from_static(bytes)),
            Some(Reply::Status(code)) => (code, Bytes::new()),
            Some(Reply::Hang) => std::future::pending().await,
            Some(Reply::Delayed(..)) | None => (404, Bytes::new()),
        };
        Ok(HttpResponse { url: request.url.clone(), status, body })
    }
}

pub fn http(transport: Arc<ScriptedTransport>, timeout: Duration) -> BoundedHttpClient {
    BoundedHttpClient::new(transport, timeout)
}

pub fn nanodlp(transport: Arc<ScriptedTransport>) -> NanoDlpBackend {
    NanoDlpBackend::new(http(transport, Duration::from_secs(1)), BASE_URL, &Config::default())
}

pub fn plates_json() -> serde_json::Value {
    serde_json::json!([
        {"PlateID": 1, "path": "calibration/cube.zip", "Preview": true, "LayersCount": 120},
        {"PlateID": 2, "path": "models/benchy.zip", "Preview": true, "LayersCount": "840"},
        {"PlateID": 3, "path": "models/flat.zip", "Preview": false}
    ])
}
