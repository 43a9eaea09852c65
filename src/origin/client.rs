use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use url::Url;

use crate::error::NetworkError;

use super::types::{Request, Response, ResponseType};

/// Network access used by the cache worker.
///
/// Each call is exactly one attempt; implementations must not retry.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// HTTP client for the site's origin server
#[derive(Clone)]
pub struct OriginClient {
  client: reqwest::Client,
  origin: Url,
}

impl OriginClient {
  pub fn new(origin: Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("campus-cache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }

  fn response_type(&self, url: &Url) -> ResponseType {
    if url.origin() == self.origin.origin() {
      ResponseType::Basic
    } else {
      ResponseType::Cors
    }
  }
}

#[async_trait]
impl Fetcher for OriginClient {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
      .map_err(|_| NetworkError::InvalidMethod(request.method.clone()))?;

    let mut builder = self.client.request(method, request.url.clone());
    if let Some(accept) = &request.accept {
      builder = builder.header(ACCEPT, accept);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| NetworkError::unreachable(request.url.as_str(), e))?;

    let status = response.status().as_u16();
    let final_url = response.url().clone();
    let content_type = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);

    let body = response
      .bytes()
      .await
      .map_err(|e| NetworkError::unreachable(final_url.as_str(), e))?;

    Ok(Response {
      url: final_url.to_string(),
      status,
      content_type,
      response_type: self.response_type(&final_url),
      body: body.to_vec(),
    })
  }
}
