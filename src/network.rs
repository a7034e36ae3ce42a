//! Network access for the strategies, the installer and the sync drains.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use url::Url;

use crate::http::{Headers, Request, Response};

/// Anything that can perform a request against the origin.
///
/// An `Err` means the request never produced a response: unreachable host,
/// timeout, or an aborted fetch. Non-2xx statuses are successful fetches.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Network backed by a reqwest client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: Url,
}

impl HttpNetwork {
  pub fn new(origin: Url, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }

  /// Resolve a path or absolute URL against the origin.
  pub fn resolve(&self, target: &str) -> Result<Url> {
    self
      .origin
      .join(target)
      .map_err(|e| eyre!("Invalid URL {}: {}", target, e))
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", request.method, e))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers: Headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      status,
      headers,
      body: body.to_vec(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use wiremock::matchers::{body_string, header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  async fn network(server: &MockServer) -> HttpNetwork {
    let origin = Url::parse(&server.uri()).unwrap();
    HttpNetwork::new(origin, Duration::from_secs(5)).unwrap()
  }

  #[tokio::test]
  async fn test_fetch_returns_status_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/styles.css"))
      .respond_with(
        ResponseTemplate::new(200).set_body_raw("body{}", "text/css"),
      )
      .mount(&server)
      .await;

    let network = network(&server).await;
    let url = network.resolve("/styles.css").unwrap();
    let response = network.fetch(&Request::get(url)).await.unwrap();

    assert!(response.is_ok());
    assert_eq!(response.content_type(), Some("text/css"));
    assert_eq!(response.text(), "body{}");
  }

  #[tokio::test]
  async fn test_non_success_status_is_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/missing"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;

    let network = network(&server).await;
    let url = network.resolve("/missing").unwrap();
    let response = network.fetch(&Request::get(url)).await.unwrap();

    assert_eq!(response.status, 404);
    assert!(!response.is_ok());
  }

  #[tokio::test]
  async fn test_post_sends_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/analytics"))
      .and(header("content-type", "application/json"))
      .and(body_string("{\"event\":\"view\"}"))
      .respond_with(ResponseTemplate::new(204))
      .expect(1)
      .mount(&server)
      .await;

    let network = network(&server).await;
    let url = network.resolve("/api/analytics").unwrap();
    let request = Request::new("POST", url)
      .with_header("Content-Type", "application/json")
      .with_body("{\"event\":\"view\"}");

    let response = network.fetch(&request).await.unwrap();
    assert_eq!(response.status, 204);
  }

  #[tokio::test]
  async fn test_unreachable_host_is_an_error() {
    let origin = Url::parse("http://127.0.0.1:9/").unwrap();
    let network = HttpNetwork::new(origin, Duration::from_millis(500)).unwrap();
    let url = network.resolve("/").unwrap();

    assert!(network.fetch(&Request::get(url)).await.is_err());
  }
}
