//! Support to store blobs on an HTTP backend.

use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};

use crate::caching::{BlobError, BlobKey, BlobResult};
use crate::config::HttpStoreConfig;

use super::{BlobStore, USER_AGENT};

/// A [`BlobStore`] talking to a REST backend.
///
/// Blobs live at `{url}/{owner}/{slot}` and are read with `GET`, written with `PUT` and
/// removed with `DELETE`.
#[derive(Debug)]
pub struct HttpBlobStore {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
    timeout: Duration,
}

impl HttpBlobStore {
    pub fn new(config: &HttpStoreConfig) -> BlobResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.timeout)
            .build()
            .map_err(BlobError::from_std_error)?;

        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &HttpStoreConfig) -> Self {
        Self {
            client,
            base_url: config.url.clone(),
            auth_token: config.auth_token.clone(),
            timeout: config.timeout,
        }
    }

    fn blob_url(&self, key: &BlobKey) -> BlobResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                BlobError::InvalidKey(format!("cannot append `{key}` to {}", self.base_url))
            })?
            .pop_if_empty()
            .push(key.owner.as_str())
            .push(key.slot.as_str());
        Ok(url)
    }

    fn request(&self, method: Method, key: &BlobKey) -> BlobResult<RequestBuilder> {
        let mut builder = self
            .client
            .request(method, self.blob_url(key)?)
            .timeout(self.timeout);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    async fn send(&self, key: &BlobKey, builder: RequestBuilder) -> BlobResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|err| self.transport_error(&err))?;

        let status = response.status();
        if status.is_success() {
            tracing::trace!("Success hitting `{}`", key);
            Ok(response)
        } else if status == StatusCode::NOT_FOUND {
            Err(BlobError::NotFound)
        } else if matches!(status, StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED) {
            tracing::debug!("Insufficient permissions to access `{}`: {}", key, status);
            Err(BlobError::PermissionDenied(status.to_string()))
        } else {
            tracing::debug!("Unexpected status code for `{}`: {}", key, status);
            Err(BlobError::Transport(status.to_string()))
        }
    }

    fn transport_error(&self, err: &reqwest::Error) -> BlobError {
        if err.is_timeout() {
            BlobError::Timeout(self.timeout)
        } else {
            BlobError::Transport(err.to_string())
        }
    }
}

impl BlobStore for HttpBlobStore {
    fn read<'a>(&'a self, key: &'a BlobKey) -> BoxFuture<'a, BlobResult<String>> {
        async move {
            let response = self.send(key, self.request(Method::GET, key)?).await?;
            response
                .text()
                .await
                .map_err(|err| self.transport_error(&err))
        }
        .boxed()
    }

    fn write<'a>(&'a self, key: &'a BlobKey, contents: String) -> BoxFuture<'a, BlobResult<()>> {
        async move {
            let builder = self
                .request(Method::PUT, key)?
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(contents);
            self.send(key, builder).await?;
            Ok(())
        }
        .boxed()
    }

    fn remove<'a>(&'a self, key: &'a BlobKey) -> BoxFuture<'a, BlobResult<()>> {
        async move {
            match self.send(key, self.request(Method::DELETE, key)?).await {
                Ok(_) | Err(BlobError::NotFound) => Ok(()),
                Err(err) => Err(err),
            }
        }
        .boxed()
    }
}
