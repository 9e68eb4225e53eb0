// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote transport.
//!
//! The cloud tier and the transfer path talk to the remote service only
//! through [`Transport`]. [`HttpTransport`] is the shipped implementation on
//! `reqwest`; tests substitute fakes.
//!
//! Bodies are generic JSON. An empty 2xx body decodes as `Value::Null`. Any
//! non-2xx status becomes [`AccessError::Transport`] carrying the status and
//! the response text.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{AccessError, Result};
use crate::request::Method;

/// Read size for streamed uploads.
const UPLOAD_CHUNK: usize = 64 * 1024;

/// Progress callback: `(transferred, total)` in bytes; total is unknown when
/// the server sends no length.
pub type ProgressFn = dyn Fn(u64, Option<u64>) + Send + Sync;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<Value>;

    async fn send(&self, method: Method, url: &str, body: &Value) -> Result<Value>;

    /// Multipart upload of `file` under field `key`, plus text `params`.
    async fn upload(
        &self,
        url: &str,
        file: &Path,
        key: &str,
        params: &BTreeMap<String, String>,
        progress: &ProgressFn,
    ) -> Result<Value>;

    /// Stream `url` into `dest`, returning the written path.
    async fn download(&self, url: &str, dest: &Path, progress: &ProgressFn) -> Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AccessError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an already configured client (custom headers, proxies).
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "Remote call failed");
        Err(AccessError::Transport {
            status: Some(status.as_u16()),
            message: if message.is_empty() {
                status.to_string()
            } else {
                message
            },
        })
    }

    /// Write the response body to `path`, returning the byte count.
    async fn write_body(
        response: &mut Response,
        path: &Path,
        total: Option<u64>,
        progress: &ProgressFn,
    ) -> Result<u64> {
        let mut out = tokio::fs::File::create(path).await?;
        let mut transferred = 0u64;
        progress(0, total);
        while let Some(chunk) = response.chunk().await? {
            out.write_all(&chunk).await?;
            transferred += chunk.len() as u64;
            progress(transferred, total);
        }
        out.flush().await?;
        Ok(transferred)
    }

    async fn decode(response: Response) -> Result<Value> {
        let bytes = Self::check(response).await?.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Hidden sibling of `dest` that a download is written to before the rename.
fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    dest.with_file_name(format!(".{name}.part"))
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<Value> {
        debug!(url, "GET");
        let response = self.client.get(url).send().await?;
        Self::decode(response).await
    }

    async fn send(&self, method: Method, url: &str, body: &Value) -> Result<Value> {
        debug!(%method, url, "Sending mutation");
        let response = self
            .client
            .request(to_reqwest(method), url)
            .json(body)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn upload(
        &self,
        url: &str,
        file: &Path,
        key: &str,
        params: &BTreeMap<String, String>,
        progress: &ProgressFn,
    ) -> Result<Value> {
        let mut reader = tokio::fs::File::open(file).await?;
        let total = reader.metadata().await?.len();
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| key.to_string());

        // Read offsets, reported while the request is in flight
        let (read_tx, mut read_rx) = mpsc::unbounded_channel::<u64>();
        let chunks = async_stream::stream! {
            let mut buf = vec![0u8; UPLOAD_CHUNK];
            let mut read = 0u64;
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        read += n as u64;
                        let _ = read_tx.send(read);
                        yield Ok::<_, std::io::Error>(buf[..n].to_vec());
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };

        let part = Part::stream_with_length(Body::wrap_stream(chunks), total).file_name(file_name);
        let mut form = Form::new().part(key.to_string(), part);
        for (name, value) in params {
            form = form.text(name.clone(), value.clone());
        }

        progress(0, Some(total));
        debug!(url, bytes = total, "Uploading file");
        let request = self.client.post(url).multipart(form).send();
        tokio::pin!(request);
        let response = loop {
            tokio::select! {
                response = &mut request => break response?,
                Some(read) = read_rx.recv() => progress(read, Some(total)),
            }
        };
        while let Ok(read) = read_rx.try_recv() {
            progress(read, Some(total));
        }
        Self::decode(response).await
    }

    /// Streams into a hidden sibling of `dest` and renames it on success, so
    /// a failed download never leaves a truncated file at `dest`.
    async fn download(&self, url: &str, dest: &Path, progress: &ProgressFn) -> Result<PathBuf> {
        let mut response = Self::check(self.client.get(url).send().await?).await?;
        let total = response.content_length();

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(dest);

        let transferred = match Self::write_body(&mut response, &partial, total, progress).await {
            Ok(transferred) => transferred,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    debug!(path = %partial.display(), error = %cleanup, "No partial download to remove");
                }
                warn!(url, error = %e, "Download interrupted");
                return Err(e);
            }
        };
        tokio::fs::rename(&partial, dest).await?;

        debug!(url, bytes = transferred, dest = %dest.display(), "Download complete");
        Ok(dest.to_path_buf())
    }
}
