use crate::application_port::*;
use crate::domain_model::*;

#[async_trait::async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange a refresh token for a new pair.
    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<TokenPair, SessionError>;
}
