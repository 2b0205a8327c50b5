use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::error_handling::types::FetchError;
use crate::network::types::FetchedResource;

/// Bounded HTTP GET.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches `url`, reading at most `limit` bytes of body.
    ///
    /// A declared `Content-Length` above `limit` fails without reading. With
    /// a declared length the read stops there, so a shorter body can be
    /// detected by the caller. Non-2xx statuses are returned, not raised.
    async fn fetch(&self, url: &str, limit: u64) -> Result<FetchedResource, FetchError>;
}

/// [`Fetcher`] backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::Request {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, limit: u64) -> Result<FetchedResource, FetchError> {
        let request_error = |e: reqwest::Error| FetchError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let mut response = self.client.get(url).send().await.map_err(request_error)?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let declared_length = response.content_length();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(declared) = declared_length {
            if declared > limit {
                warn!("{} declares {} bytes, limit is {}", url, declared, limit);
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    declared,
                    limit,
                });
            }
        }

        let bound = declared_length.unwrap_or(limit) as usize;
        let mut body = Vec::with_capacity(bound.min(64 * 1024));
        while let Some(chunk) = response.chunk().await.map_err(request_error)? {
            let room = bound - body.len();
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                break;
            }
            body.extend_from_slice(&chunk);
        }

        debug!("GET {} -> {} ({} bytes)", url, status, body.len());
        Ok(FetchedResource {
            url: final_url,
            status,
            content_type,
            declared_length,
            body,
        })
    }
}
