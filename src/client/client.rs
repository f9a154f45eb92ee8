use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_port::*;
use crate::infra_http::*;
use crate::infra_store::*;
use crate::infra_ws::*;
use crate::logger::*;
use crate::settings::Settings;
use std::sync::Arc;

/// Everything a front end needs: the session and the live channel, wired
/// against one token store.
pub struct Client {
    pub session: Arc<SessionManager>,
    pub channel: Arc<RealtimeChannel>,
}

impl Client {
    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let store: Arc<dyn TokenStore> = match settings.session.backend.as_str() {
            "memory" => Arc::new(MemoryTokenStore::new()),
            "file" => Arc::new(FileTokenStore::new(&settings.session.storage_path)),
            other => return Err(anyhow::anyhow!("Unknown session backend: {}", other)),
        };

        let http = reqwest::Client::builder()
            .user_agent(concat!("talentbridge/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let auth_api: Arc<dyn AuthApi> = Arc::new(HttpAuthApi::new(
            http.clone(),
            &settings.api.base_url,
            &settings.api.refresh_path,
        )?);

        let session = Arc::new(SessionManager::new(
            SessionConfig {
                base_url: settings.api.base_url.clone(),
                logout_path: settings.api.logout_path.clone(),
                expiry_buffer: settings.session.expiry_buffer(),
            },
            http,
            auth_api,
            store,
        ));
        let restored = session.restore().await?;
        debug!(restored, backend = %settings.session.backend, "session store opened");

        // region realtime
        let url = push_url(&settings.api.base_url, &settings.realtime.path)?;
        let token_provider: Arc<dyn TokenProvider> = session.clone();
        let connector: Arc<dyn PushConnector> = Arc::new(WsPushConnector::new());
        let channel = Arc::new(RealtimeChannel::new(
            RealtimeConfig {
                url,
                reconnect_base_delay: settings.realtime.reconnect_base_delay(),
                max_reconnect_attempts: settings.realtime.max_reconnect_attempts,
            },
            token_provider,
            connector,
        ));
        // endregion

        info!("client ready");

        Ok(Self { session, channel })
    }

    pub async fn shutdown(&self) {
        info!("client shutting down...");
        self.channel.disconnect().await;
    }
}
