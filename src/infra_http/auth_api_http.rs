use crate::application_impl::join_path;
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a RefreshToken,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    tokens: TokenPair,
}

pub struct HttpAuthApi {
    http: reqwest::Client,
    refresh_url: Url,
}

impl HttpAuthApi {
    pub fn new(http: reqwest::Client, base_url: &Url, refresh_path: &str) -> Result<Self, SessionError> {
        Ok(Self {
            http,
            refresh_url: join_path(base_url, refresh_path)?,
        })
    }
}

#[async_trait::async_trait]
impl AuthApi for HttpAuthApi {
    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<TokenPair, SessionError> {
        let response = self
            .http
            .post(self.refresh_url.clone())
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SessionError::from_response(response).await);
        }
        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| SessionError::InvalidResponse(e.to_string()))?;
        Ok(body.tokens)
    }
}
