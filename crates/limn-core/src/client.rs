use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Response;

use crate::error::{Error, Result};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_USER_AGENT: &str = concat!("limn/", env!("CARGO_PKG_VERSION"));

/// HTTP client configuration, set at construction.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Explicit HTTP client passed into each component that talks to the
/// network. Cheap to clone; the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .build()?;
        Ok(Self { inner })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(&ClientConfig::default())
    }

    pub async fn get(&self, url: &str, accept: &str) -> Result<Response> {
        let resp = self
            .inner
            .get(url)
            .headers(accept_header(accept))
            .send()
            .await?;
        Ok(resp)
    }

    pub async fn get_with_query(
        &self,
        url: &str,
        query: &[(&str, &str)],
        accept: &str,
    ) -> Result<Response> {
        let resp = self
            .inner
            .get(url)
            .query(query)
            .headers(accept_header(accept))
            .send()
            .await?;
        Ok(resp)
    }

    /// POST an `application/x-www-form-urlencoded` body.
    pub async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        accept: &str,
    ) -> Result<Response> {
        let resp = self
            .inner
            .post(url)
            .form(form)
            .headers(accept_header(accept))
            .send()
            .await?;
        Ok(resp)
    }

    pub async fn post_json<T: serde::Serialize + Sync>(
        &self,
        url: &str,
        json: &T,
    ) -> Result<Response> {
        let resp = self.inner.post(url).json(json).send().await?;
        Ok(resp)
    }
}

fn accept_header(accept: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(accept) {
        headers.insert(ACCEPT, value);
    }
    headers
}

/// Map a non-success response to [`Error::Upstream`], passing success through.
pub fn ensure_success(resp: Response) -> Result<Response> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(Error::Upstream {
            endpoint: resp.url().to_string(),
            status: resp.status().as_u16(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.user_agent.starts_with("limn/"));
    }

    #[test]
    fn test_client_builds() {
        assert!(HttpClient::with_defaults().is_ok());
    }

    #[test]
    fn test_accept_header() {
        let headers = accept_header("application/n-triples");
        assert_eq!(
            headers.get(ACCEPT).unwrap().to_str().unwrap(),
            "application/n-triples"
        );
    }
}
