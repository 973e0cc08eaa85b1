//! Glance Host HTTP
//!
//! The HTTP client capability handed to script executors. Widget scripts call
//! internal, often self-signed endpoints, so certificate validation is off by
//! default; proxy routing and timeouts are explicit policy passed to the
//! constructor, never ambient process state.
//!
//! Connect and per-request timeouts bound each outbound call independently of
//! the overall script deadline, so one stuck endpoint cannot pin a request
//! past its own budget.

use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use url::Url;

/// Policy applied to every request made through an [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpPolicy {
  /// Skip TLS certificate validation. Defaults to `true`: the expected
  /// targets are internal endpoints with self-signed certificates.
  pub accept_invalid_certs: bool,
  /// Proxy URL applied to all requests, if any.
  pub proxy: Option<String>,
  /// Comma-separated hosts exempted from the proxy.
  pub no_proxy: Option<String>,
  pub connect_timeout: Duration,
  /// Total budget for one request, independent of the script deadline.
  pub request_timeout: Duration,
}

impl Default for HttpPolicy {
  fn default() -> Self {
    Self {
      accept_invalid_certs: true,
      proxy: None,
      no_proxy: None,
      connect_timeout: Duration::from_secs(10),
      request_timeout: Duration::from_secs(30),
    }
  }
}

/// Errors raised by the HTTP capability.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
  #[error("invalid url '{url}': {message}")]
  InvalidUrl { url: String, message: String },

  #[error("invalid proxy '{url}': {message}")]
  InvalidProxy { url: String, message: String },

  #[error("invalid header '{0}'")]
  InvalidHeader(String),

  #[error(transparent)]
  Transport(#[from] reqwest::Error),
}

/// Response surfaced to the script layer: status for classification, the body,
/// and the value of the one response header the caller asked for, if any.
#[derive(Debug, Clone)]
pub struct HttpResponse {
  pub status: u16,
  pub body: String,
  pub header: Option<String>,
}

impl HttpResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// HTTP client configured from an [`HttpPolicy`].
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
}

impl HttpClient {
  pub fn new(policy: &HttpPolicy) -> Result<Self, HttpError> {
    let mut builder = reqwest::Client::builder()
      .danger_accept_invalid_certs(policy.accept_invalid_certs)
      .connect_timeout(policy.connect_timeout)
      .timeout(policy.request_timeout);

    if let Some(proxy_url) = &policy.proxy {
      let mut proxy = reqwest::Proxy::all(proxy_url).map_err(|e| HttpError::InvalidProxy {
        url: proxy_url.clone(),
        message: e.to_string(),
      })?;
      if let Some(no_proxy) = &policy.no_proxy {
        proxy = proxy.no_proxy(reqwest::NoProxy::from_string(no_proxy));
      }
      builder = builder.proxy(proxy);
    }

    Ok(Self {
      client: builder.build()?,
    })
  }

  /// Perform a GET request. `header` is an optional request header;
  /// `return_header` names a response header whose value is surfaced on the
  /// response instead of being discarded.
  pub async fn get(
    &self,
    url: &str,
    header: Option<(&str, &str)>,
    return_header: Option<&str>,
  ) -> Result<HttpResponse, HttpError> {
    let url = parse_url(url)?;
    let mut request = self.client.get(url);
    if let Some((name, value)) = header {
      request = request.header(parse_header_name(name)?, parse_header_value(value)?);
    }
    execute(request, return_header).await
  }

  /// Perform a POST request with a raw body. `media_type` sets the
  /// `Content-Type`; absent, the body is sent as `application/json`.
  pub async fn post(
    &self,
    url: &str,
    body: &str,
    header: Option<(&str, &str)>,
    media_type: Option<&str>,
  ) -> Result<HttpResponse, HttpError> {
    let url = parse_url(url)?;
    let content_type = media_type.unwrap_or("application/json");
    let mut request = self
      .client
      .post(url)
      .header(reqwest::header::CONTENT_TYPE, parse_header_value(content_type)?)
      .body(body.to_string());
    if let Some((name, value)) = header {
      request = request.header(parse_header_name(name)?, parse_header_value(value)?);
    }
    execute(request, None).await
  }
}

async fn execute(
  request: reqwest::RequestBuilder,
  return_header: Option<&str>,
) -> Result<HttpResponse, HttpError> {
  let response = request.send().await?;
  let status = response.status().as_u16();
  let header = return_header.and_then(|name| {
    response
      .headers()
      .get(name)
      .and_then(|v| v.to_str().ok())
      .map(str::to_owned)
  });
  let body = response.text().await?;

  Ok(HttpResponse {
    status,
    body,
    header,
  })
}

fn parse_url(url: &str) -> Result<Url, HttpError> {
  Url::parse(url).map_err(|e| HttpError::InvalidUrl {
    url: url.to_string(),
    message: e.to_string(),
  })
}

fn parse_header_name(name: &str) -> Result<HeaderName, HttpError> {
  name
    .parse::<HeaderName>()
    .map_err(|_| HttpError::InvalidHeader(name.to_string()))
}

fn parse_header_value(value: &str) -> Result<HeaderValue, HttpError> {
  value
    .parse::<HeaderValue>()
    .map_err(|_| HttpError::InvalidHeader(value.to_string()))
}
