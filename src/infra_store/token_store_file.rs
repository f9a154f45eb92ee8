use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const ACCESS_TOKEN_KEY: &str = "accessToken";
const REFRESH_TOKEN_KEY: &str = "refreshToken";
const USER_KEY: &str = "user";

type Entries = BTreeMap<String, String>;

/// Key/value JSON file. Writes go to a sibling temp file first and are then
/// renamed over the existing file.
pub struct FileTokenStore {
    path: PathBuf,
    // serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_entries(&self) -> Result<Entries, SessionError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Entries::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                SessionError::Store(format!("corrupt session file {:?}: {}", self.path, e))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Entries::new()),
            Err(e) => Err(store_error(&self.path, e)),
        }
    }

    async fn write_entries(&self, entries: &Entries) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| store_error(parent, e))?;
        }
        let bytes =
            serde_json::to_vec_pretty(entries).map_err(|e| SessionError::Store(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| store_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| store_error(&self.path, e))?;
        Ok(())
    }

    async fn update(&self, apply: impl FnOnce(&mut Entries)) -> Result<(), SessionError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        apply(&mut entries);
        self.write_entries(&entries).await
    }
}

fn store_error(path: &Path, e: std::io::Error) -> SessionError {
    SessionError::Store(format!("{:?}: {}", path, e))
}

#[async_trait::async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<StoredSession, SessionError> {
        let _guard = self.lock.lock().await;
        let entries = self.read_entries().await?;

        let tokens = match (entries.get(ACCESS_TOKEN_KEY), entries.get(REFRESH_TOKEN_KEY)) {
            (Some(access), Some(refresh)) => Some(TokenPair::new(access, refresh)),
            _ => None,
        };
        let user = match entries.get(USER_KEY) {
            Some(raw) => match serde_json::from_str::<SessionUser>(raw) {
                Ok(user) => Some(user),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring unreadable stored user");
                    None
                }
            },
            None => None,
        };
        Ok(StoredSession { tokens, user })
    }

    async fn save_tokens(&self, tokens: &TokenPair) -> Result<(), SessionError> {
        let access = tokens.access_token.0.clone();
        let refresh = tokens.refresh_token.0.clone();
        self.update(|entries| {
            entries.insert(ACCESS_TOKEN_KEY.to_string(), access);
            entries.insert(REFRESH_TOKEN_KEY.to_string(), refresh);
        })
        .await
    }

    async fn save_user(&self, user: &SessionUser) -> Result<(), SessionError> {
        let raw = serde_json::to_string(user).map_err(|e| SessionError::Store(e.to_string()))?;
        self.update(|entries| {
            entries.insert(USER_KEY.to_string(), raw);
        })
        .await
    }

    async fn clear(&self) -> Result<(), SessionError> {
        self.update(|entries| {
            entries.remove(ACCESS_TOKEN_KEY);
            entries.remove(REFRESH_TOKEN_KEY);
            entries.remove(USER_KEY);
        })
        .await
    }
}
