use async_trait::async_trait;
use std::time::Duration;
use url::Url;

/// Response header carrying the replacement token.
pub const REFRESH_TOKEN_HEADER: &str = "refresh-token";
/// Request header carrying the stale token.
pub const STALE_TOKEN_HEADER: &str = "token";

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("invalid authentication server url: {0}")]
    InvalidUrl(String),
    #[error("refresh request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("authentication server answered {0}")]
    Rejected(u16),
}

/// Out-of-band token refresh against the external authentication service.
///
/// Returns the replacement token when the service hands one back.
#[async_trait]
pub trait RefreshClient: Send + Sync {
    async fn refresh(&self, token: &str) -> Result<Option<String>, RefreshError>;
}

/// `POST {base}/refresh-token` with the stale token in the `token` header.
pub struct HttpRefreshClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpRefreshClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RefreshError> {
        let endpoint = Self::endpoint(base_url)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    fn endpoint(base_url: &str) -> Result<Url, RefreshError> {
        let mut url = Url::parse(base_url).map_err(|e| RefreshError::InvalidUrl(format!("{base_url}: {e}")))?;
        let path = format!("{}/refresh-token", url.path().trim_end_matches('/'));
        url.set_path(&path);
        Ok(url)
    }
}

#[async_trait]
impl RefreshClient for HttpRefreshClient {
    async fn refresh(&self, token: &str) -> Result<Option<String>, RefreshError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(STALE_TOKEN_HEADER, token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RefreshError::Rejected(response.status().as_u16()));
        }

        Ok(response
            .headers()
            .get(REFRESH_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string))
    }
}
