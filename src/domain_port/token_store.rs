use crate::application_port::*;
use crate::domain_model::*;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredSession {
    pub tokens: Option<TokenPair>,
    pub user: Option<SessionUser>,
}

/// Durable key/value persistence for the session. Read once on start and
/// written on every token mutation.
#[async_trait::async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<StoredSession, SessionError>;
    async fn save_tokens(&self, tokens: &TokenPair) -> Result<(), SessionError>;
    async fn save_user(&self, user: &SessionUser) -> Result<(), SessionError>;
    /// Remove tokens and user data.
    async fn clear(&self) -> Result<(), SessionError>;
}
