use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use tokio::sync::RwLock;

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    session: RwLock<StoredSession>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<StoredSession, SessionError> {
        Ok(self.session.read().await.clone())
    }

    async fn save_tokens(&self, tokens: &TokenPair) -> Result<(), SessionError> {
        self.session.write().await.tokens = Some(tokens.clone());
        Ok(())
    }

    async fn save_user(&self, user: &SessionUser) -> Result<(), SessionError> {
        self.session.write().await.user = Some(user.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), SessionError> {
        *self.session.write().await = StoredSession::default();
        Ok(())
    }
}
