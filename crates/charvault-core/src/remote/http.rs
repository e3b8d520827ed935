//! REST client for a per-user character collection
//!
//! Endpoints, relative to the base URL:
//!
//! | Operation     | Request                              |
//! |---------------|--------------------------------------|
//! | `fetch_all`   | `GET    /characters`                 |
//! | `upsert`      | `POST   /characters` (JSON body)     |
//! | `delete`      | `DELETE /characters/{id}`            |
//! | `put_image`   | `PUT    /characters/{id}/image`      |
//! | `fetch_image` | `GET    /characters/{id}/image`      |
//!
//! Every request carries the bearer token when one is configured. Any
//! transport failure or non-2xx status becomes `StoreError::Network`.
//! Character ids are percent-encoded as single path segments.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use tracing::debug;

use super::RemoteStore;
use crate::error::{StoreError, StoreResult};
use crate::types::StoredCharacter;

/// HTTP implementation of [`RemoteStore`]
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpRemote {
    /// Build a client for `base_url`; `timeout` bounds each request.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Validation` if `base_url` is not an absolute
    /// URL that can carry a path.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> StoreResult<Self> {
        let raw = base_url.into();
        let base_url = Url::parse(raw.trim_end_matches('/'))
            .map_err(|e| StoreError::Validation(format!("invalid remote URL '{}': {}", raw, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::Validation(format!(
                "remote URL '{}' cannot carry a path",
                raw
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(StoreError::network)?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `base_url` with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn collection_url(&self) -> Url {
        self.endpoint(&["characters"])
    }

    fn character_url(&self, id: &str) -> Url {
        self.endpoint(&["characters", id])
    }

    fn image_url(&self, id: &str) -> Url {
        self.endpoint(&["characters", id, "image"])
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> StoreResult<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| StoreError::Network(format!("{}: {}", operation, e)))?;
        debug!(operation, status = %response.status(), "Remote response");
        Ok(response)
    }
}

fn ensure_success(operation: &str, response: &Response) -> StoreResult<()> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(StoreError::Network(format!(
            "{} failed with status {}",
            operation,
            response.status()
        )))
    }
}

impl RemoteStore for HttpRemote {
    async fn fetch_all(&self) -> StoreResult<Vec<StoredCharacter>> {
        let response = self
            .send("fetch_all", self.client.get(self.collection_url()))
            .await?;
        ensure_success("fetch_all", &response)?;
        response
            .json::<Vec<StoredCharacter>>()
            .await
            .map_err(|e| StoreError::Network(format!("fetch_all: invalid body: {}", e)))
    }

    async fn upsert(&self, record: &StoredCharacter) -> StoreResult<StoredCharacter> {
        let response = self
            .send("upsert", self.client.post(self.collection_url()).json(record))
            .await?;
        ensure_success("upsert", &response)?;
        response
            .json::<StoredCharacter>()
            .await
            .map_err(|e| StoreError::Network(format!("upsert: invalid body: {}", e)))
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let response = self
            .send("delete", self.client.delete(self.character_url(id)))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success("delete", &response)?;
        Ok(true)
    }

    async fn put_image(&self, id: &str, data: &[u8]) -> StoreResult<()> {
        let request = self.client.put(self.image_url(id)).body(data.to_vec());
        let response = self.send("put_image", request).await?;
        ensure_success("put_image", &response)
    }

    async fn fetch_image(&self, id: &str) -> StoreResult<Option<Vec<u8>>> {
        let response = self
            .send("fetch_image", self.client.get(self.image_url(id)))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        ensure_success("fetch_image", &response)?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| StoreError::Network(format!("fetch_image: {}", e)))?;
        Ok(Some(bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(base: &str) -> HttpRemote {
        HttpRemote::new(base, None, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_urls() {
        let remote = remote("https://api.example.com/v1/");
        assert_eq!(remote.base_url().as_str(), "https://api.example.com/v1");
        assert_eq!(
            remote.collection_url().as_str(),
            "https://api.example.com/v1/characters"
        );
        assert_eq!(
            remote.character_url("01ABC").as_str(),
            "https://api.example.com/v1/characters/01ABC"
        );
        assert_eq!(
            remote.image_url("01ABC").as_str(),
            "https://api.example.com/v1/characters/01ABC/image"
        );
    }

    #[test]
    fn test_ids_are_encoded_as_one_segment() {
        let remote = remote("https://api.example.com");
        assert_eq!(
            remote.character_url("a?b#c%d e").as_str(),
            "https://api.example.com/characters/a%3Fb%23c%25d%20e"
        );
        assert_eq!(
            remote.image_url("x/y").as_str(),
            "https://api.example.com/characters/x%2Fy/image"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let err = HttpRemote::new("not a url", None, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        let err = HttpRemote::new("mailto:someone@example.com", None, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        // Port 9 (discard) on localhost is not expected to serve HTTP
        let remote = remote("http://127.0.0.1:9");
        let err = remote.fetch_all().await.unwrap_err();
        assert!(err.is_remote());
    }
}
