//! HTTP client for image downloads and discovery documents.

use std::io::Write;
use std::time::Duration;

use acb_core::error::{BuildError, Result};
use futures::StreamExt;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::{redirect, StatusCode};

use super::progress::download_bar;

/// Redirects followed before a request is abandoned.
pub const MAX_REDIRECTS: usize = 10;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a (possibly conditional) download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Server answered `304 Not Modified`; nothing was written.
    NotModified,
    /// Body written in full.
    Downloaded { etag: Option<String>, bytes: u64 },
}

/// HTTP client shared by discovery and image downloads.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: reqwest::Client,
}

impl RegistryClient {
    /// Build a client. `insecure` disables TLS certificate verification.
    pub fn new(insecure: bool) -> Result<Self> {
        let policy = redirect::Policy::custom(|attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else {
                attempt.follow()
            }
        });

        let client = reqwest::Client::builder()
            .redirect(policy)
            .danger_accept_invalid_certs(insecure)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("acb/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BuildError::Network {
                url: String::new(),
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { client })
    }

    /// GET `url` into `writer`.
    ///
    /// With `etag`, the request carries `If-None-Match` and a `304` answer
    /// returns [`DownloadOutcome::NotModified`] without touching `writer`.
    pub async fn download<W: Write + Send>(
        &self,
        url: &str,
        writer: &mut W,
        etag: Option<&str>,
        label: &str,
    ) -> Result<DownloadOutcome> {
        let mut request = self.client.get(url);
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await.map_err(|e| request_error(url, &e))?;
        let status = response.status();

        if etag.is_some() && status == StatusCode::NOT_MODIFIED {
            tracing::debug!(url = %url, "Image not modified");
            return Ok(DownloadOutcome::NotModified);
        }
        if !status.is_success() {
            return Err(BuildError::Network {
                url: url.to_string(),
                message: format!("bad HTTP status code: {}", status.as_u16()),
            });
        }

        let new_etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bar = download_bar(response.content_length(), label);
        let mut stream = response.bytes_stream();
        let mut bytes = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| request_error(url, &e))?;
            writer.write_all(&chunk)?;
            bytes += chunk.len() as u64;
            bar.inc(chunk.len() as u64);
        }
        writer.flush()?;
        bar.finish_and_clear();

        tracing::debug!(url = %url, bytes, etag = ?new_etag, "Downloaded image");
        Ok(DownloadOutcome::Downloaded {
            etag: new_etag,
            bytes,
        })
    }

    /// GET a small text document. Returns `None` on a non-success status.
    pub async fn get_text(&self, url: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| request_error(url, &e))?;
        if !response.status().is_success() {
            tracing::debug!(url = %url, status = response.status().as_u16(), "Discovery fetch failed");
            return Ok(None);
        }
        let body = response.text().await.map_err(|e| request_error(url, &e))?;
        Ok(Some(body))
    }
}

/// Map a reqwest failure, turning name-resolution failures into `NoHost`.
fn request_error(url: &str, err: &reqwest::Error) -> BuildError {
    let message = error_chain(err);
    if err.is_connect() && is_dns_failure(&message) {
        let host = reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| url.to_string());
        return BuildError::NoHost { host };
    }
    BuildError::Network {
        url: url.to_string(),
        message,
    }
}

fn is_dns_failure(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    ["dns error", "failed to lookup address", "no such host", "name or service not known"]
        .iter()
        .any(|needle| message.contains(needle))
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
