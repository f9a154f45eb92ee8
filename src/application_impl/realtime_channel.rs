use crate::application_impl::{SubscriberRegistry, Unsubscribe};
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub url: Url,
    pub reconnect_base_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl RealtimeConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            reconnect_base_delay: Duration::from_secs(1),
            max_reconnect_attempts: 5,
        }
    }
}

/// Derives the push endpoint from the HTTP API base: the scheme is swapped
/// for its WebSocket equivalent and `path` is appended.
pub fn push_url(api_base: &Url, path: &str) -> anyhow::Result<Url> {
    let scheme = match api_base.scheme() {
        "http" => "ws",
        "https" => "wss",
        other @ ("ws" | "wss") => other,
        other => return Err(anyhow::anyhow!("unsupported api scheme: {}", other)),
    };
    let rest = &api_base.as_str()[api_base.scheme().len()..];
    let joined = format!(
        "{}{}/{}",
        scheme,
        rest.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Ok(Url::parse(&joined)?)
}

struct Supervisor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct ChannelInner {
    config: RealtimeConfig,
    token_provider: Arc<dyn TokenProvider>,
    connector: Arc<dyn PushConnector>,
    registry: Arc<SubscriberRegistry>,
    state: watch::Sender<ChannelState>,
    attempts: AtomicU32,
}

/// Authenticated push connection with reconnect and named-event fan-out.
pub struct RealtimeChannel {
    inner: Arc<ChannelInner>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl RealtimeChannel {
    pub fn new(
        config: RealtimeConfig,
        token_provider: Arc<dyn TokenProvider>,
        connector: Arc<dyn PushConnector>,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Self {
            inner: Arc::new(ChannelInner {
                config,
                token_provider,
                connector,
                registry: SubscriberRegistry::new(),
                state,
                attempts: AtomicU32::new(0),
            }),
            supervisor: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Opens the connection unless one is open or being opened. Without a
    /// valid access token this only logs. Resolves once the first attempt
    /// has settled.
    pub async fn connect(&self) {
        let state = self.state();
        if state != ChannelState::Disconnected {
            tracing::debug!(%state, "connect ignored");
            return;
        }

        let Some(token) = self.inner.token_provider.current_access_token().await else {
            tracing::warn!("no valid access token, push channel not connected");
            return;
        };

        let claimed = self.inner.state.send_if_modified(|s| {
            if *s == ChannelState::Disconnected {
                *s = ChannelState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return;
        }

        let mut changes = self.state_changes();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.inner.clone().supervise(token, cancel.clone()));
        let previous = self
            .lock_supervisor()
            .replace(Supervisor { cancel, handle });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        let _ = changes
            .wait_for(|s| *s != ChannelState::Connecting)
            .await;
    }

    /// Closes the connection, stops any pending reconnect and drops every
    /// subscription.
    pub async fn disconnect(&self) {
        let supervisor = self.lock_supervisor().take();
        if let Some(Supervisor { cancel, handle }) = supervisor {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::error!("push channel supervisor failed: {e}");
            }
        }
        self.inner.registry.clear();
        self.inner.set_state(ChannelState::Disconnected);
        tracing::debug!("push channel disconnected");
    }

    pub fn on(&self, event: &str, callback: EventCallback) -> Unsubscribe {
        self.inner.registry.on(event, callback)
    }

    pub fn off(&self, event: &str, callback: &EventCallback) -> bool {
        self.inner.registry.off(event, callback)
    }

    pub fn on_analysis_progress<F>(&self, f: F) -> Unsubscribe
    where
        F: Fn(AnalysisProgress) + Send + Sync + 'static,
    {
        self.on(
            ANALYSIS_PROGRESS_EVENT,
            callback(move |data| {
                match serde_json::from_value::<AnalysisProgress>(data.clone()) {
                    Ok(progress) => f(progress),
                    Err(e) => tracing::warn!(error = %e, "malformed analysis progress payload"),
                }
            }),
        )
    }

    fn lock_supervisor(&self) -> std::sync::MutexGuard<'_, Option<Supervisor>> {
        self.supervisor.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ChannelInner {
    fn set_state(&self, next: ChannelState) {
        self.state.send_if_modified(|s| {
            if *s == next {
                false
            } else {
                *s = next;
                true
            }
        });
    }

    /// Next reconnect attempt number, or `None` once the cap is reached.
    fn next_attempt(&self) -> Option<u32> {
        let max = self.config.max_reconnect_attempts;
        self.attempts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()
            .map(|previous| previous + 1)
    }

    async fn supervise(self: Arc<Self>, first_token: AccessToken, cancel: CancellationToken) {
        let mut token = Some(first_token);
        loop {
            let access = match token.take() {
                Some(t) => t,
                None => match self.token_provider.current_access_token().await {
                    Some(t) => t,
                    None => {
                        tracing::warn!("no valid access token, reconnect abandoned");
                        self.set_state(ChannelState::Disconnected);
                        return;
                    }
                },
            };

            self.set_state(ChannelState::Connecting);
            let opened = tokio::select! {
                _ = cancel.cancelled() => return,
                r = self.connector.connect(&self.config.url, &access) => r,
            };

            match opened {
                Ok(link) => {
                    self.attempts.store(0, Ordering::SeqCst);
                    self.set_state(ChannelState::Connected);
                    tracing::info!(url = %self.config.url, "push channel connected");

                    let reason = self.pump(link, &cancel).await;
                    if cancel.is_cancelled() {
                        return;
                    }
                    tracing::warn!(%reason, "push channel dropped");
                }
                Err(e) => tracing::warn!(error = %e, "push channel connection error"),
            }

            let Some(attempt) = self.next_attempt() else {
                tracing::error!(
                    max_attempts = self.config.max_reconnect_attempts,
                    "push channel reconnect attempts exhausted"
                );
                self.set_state(ChannelState::Disconnected);
                return;
            };

            self.set_state(ChannelState::Reconnecting);
            let delay = self.config.reconnect_base_delay * attempt;
            tracing::info!(attempt, ?delay, "push channel reconnect scheduled");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn pump(&self, link: PushLink, cancel: &CancellationToken) -> String {
        let PushLink {
            mut sender,
            mut receiver,
        } = link;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = sender.send(ConnMessage::Close).await;
                    return "closed by client".to_string();
                }
                m = receiver.next() => m,
            };

            match next {
                None => return "stream ended".to_string(),
                Some(Err(e)) => return format!("transport error: {e}"),
                Some(Ok(ConnMessage::Text(text))) => self.handle_text(&text),
                Some(Ok(ConnMessage::Close)) => return "closed by server".to_string(),
                // pings are answered by the transport itself
                Some(Ok(other)) => tracing::trace!(?other, "ignored push frame"),
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match serde_json::from_str::<ServerEvent>(text) {
            Ok(ServerEvent { event, data }) => {
                let delivered = self.registry.dispatch(&event, &data);
                tracing::trace!(event, delivered, "push event dispatched");
            }
            Err(e) => tracing::warn!(error = %e, "unparseable push frame"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    struct FixedToken(Mutex<Option<AccessToken>>);

    impl FixedToken {
        fn some() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Some(AccessToken("live-token".into())))))
        }

        fn none() -> Arc<Self> {
            Arc::new(Self(Mutex::new(None)))
        }
    }

    #[async_trait::async_trait]
    impl TokenProvider for FixedToken {
        async fn current_access_token(&self) -> Option<AccessToken> {
            self.0.lock().unwrap().clone()
        }
    }

    /// Server side of an accepted connection.
    struct ServerEnd {
        to_client: mpsc::Sender<ConnMessage>,
        from_client: mpsc::Receiver<ConnMessage>,
    }

    impl ServerEnd {
        async fn push(&self, event: &str, data: serde_json::Value) {
            let frame = serde_json::to_string(&ServerEvent {
                event: event.to_string(),
                data,
            })
            .unwrap();
            self.to_client.send(ConnMessage::Text(frame)).await.unwrap();
        }
    }

    enum Script {
        Accept,
        Refuse,
    }

    /// Replays a script of outcomes, refusing once it runs out.
    struct ScriptedConnector {
        script: Mutex<VecDeque<Script>>,
        calls: AtomicUsize,
        accepted: mpsc::UnboundedSender<ServerEnd>,
        tokens_seen: Mutex<Vec<AccessToken>>,
    }

    impl ScriptedConnector {
        fn new(script: Vec<Script>) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
            let (accepted, rx) = mpsc::unbounded_channel();
            let connector = Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                accepted,
                tokens_seen: Mutex::new(Vec::new()),
            });
            (connector, rx)
        }

        fn push_script(&self, step: Script) {
            self.script.lock().unwrap().push_back(step);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl PushConnector for ScriptedConnector {
        async fn connect(&self, _url: &Url, token: &AccessToken) -> anyhow::Result<PushLink> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.tokens_seen.lock().unwrap().push(token.clone());
            let step = self.script.lock().unwrap().pop_front();
            match step {
                Some(Script::Accept) => {
                    let (to_client, client_rx) = mpsc::channel(16);
                    let (client_tx, from_client) = mpsc::channel(16);
                    let _ = self.accepted.send(ServerEnd {
                        to_client,
                        from_client,
                    });
                    Ok(PushLink {
                        sender: Box::new(client_tx),
                        receiver: Box::new(client_rx),
                    })
                }
                Some(Script::Refuse) | None => Err(anyhow::anyhow!("connection refused")),
            }
        }
    }

    fn channel(
        provider: Arc<FixedToken>,
        connector: Arc<ScriptedConnector>,
        max_attempts: u32,
    ) -> RealtimeChannel {
        let mut config = RealtimeConfig::new(Url::parse("ws://127.0.0.1:9/ws").unwrap());
        config.reconnect_base_delay = Duration::from_millis(100);
        config.max_reconnect_attempts = max_attempts;
        RealtimeChannel::new(config, provider, connector)
    }

    #[test]
    fn push_url_swaps_scheme_and_appends_path() {
        let http = Url::parse("http://localhost:3001/api").unwrap();
        assert_eq!(push_url(&http, "/ws").unwrap().as_str(), "ws://localhost:3001/api/ws");

        let https = Url::parse("https://api.example.com/").unwrap();
        assert_eq!(push_url(&https, "ws").unwrap().as_str(), "wss://api.example.com/ws");

        let ftp = Url::parse("ftp://example.com").unwrap();
        assert!(push_url(&ftp, "/ws").is_err());
    }

    #[tokio::test]
    async fn connect_without_token_is_a_soft_noop() {
        let (connector, _accepted) = ScriptedConnector::new(vec![Script::Accept]);
        let channel = channel(FixedToken::none(), connector.clone(), 3);

        channel.connect().await;
        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert_eq!(connector.calls(), 0);
    }

    #[tokio::test]
    async fn events_fan_out_to_subscribers() {
        let (connector, mut accepted) = ScriptedConnector::new(vec![Script::Accept]);
        let channel = channel(FixedToken::some(), connector.clone(), 3);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = channel.on_analysis_progress(move |p| {
            let _ = tx.send(p);
        });

        channel.connect().await;
        assert_eq!(channel.state(), ChannelState::Connected);
        assert_eq!(
            connector.tokens_seen.lock().unwrap().clone(),
            vec![AccessToken("live-token".into())]
        );

        let server = accepted.recv().await.unwrap();
        server.push("unrelated", json!({})).await;
        server
            .push(
                ANALYSIS_PROGRESS_EVENT,
                json!({ "analysisRequestId": "req-1", "status": "RESUME_PARSING", "progress": 20 }),
            )
            .await;

        let progress = rx.recv().await.unwrap();
        assert_eq!(progress.analysis_request_id.0, "req-1");
        assert_eq!(progress.status, AnalysisStatus::ResumeParsing);
        assert_eq!(progress.progress, 20);

        channel.disconnect().await;
    }

    #[tokio::test]
    async fn connect_is_idempotent_while_connected() {
        let (connector, _accepted) = ScriptedConnector::new(vec![Script::Accept, Script::Accept]);
        let channel = channel(FixedToken::some(), connector.clone(), 3);

        channel.connect().await;
        channel.connect().await;
        assert_eq!(connector.calls(), 1);
        channel.disconnect().await;
    }

    #[tokio::test]
    async fn control_frames_are_left_to_the_transport() {
        let (connector, mut accepted) = ScriptedConnector::new(vec![Script::Accept]);
        let channel = channel(FixedToken::some(), connector, 3);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = channel.on("job:update", callback(move |data| {
            let _ = tx.send(data.clone());
        }));
        channel.connect().await;

        let mut server = accepted.recv().await.unwrap();
        server.to_client.send(ConnMessage::Ping(vec![1, 2])).await.unwrap();
        server.push("job:update", json!({ "id": 4 })).await;
        assert_eq!(rx.recv().await, Some(json!({ "id": 4 })));
        assert_eq!(channel.state(), ChannelState::Connected);

        // nothing but the close frame goes back to the server
        channel.disconnect().await;
        assert_eq!(server.from_client.recv().await, Some(ConnMessage::Close));
        assert_eq!(server.from_client.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_attempts_stop_at_the_cap() {
        let (connector, mut accepted) = ScriptedConnector::new(vec![Script::Accept]);
        let channel = channel(FixedToken::some(), connector.clone(), 3);
        let mut changes = channel.state_changes();

        channel.connect().await;
        assert_eq!(channel.state(), ChannelState::Connected);

        let started = tokio::time::Instant::now();
        drop(accepted.recv().await.unwrap());

        changes
            .wait_for(|s| *s == ChannelState::Reconnecting)
            .await
            .unwrap();
        changes
            .wait_for(|s| *s == ChannelState::Disconnected)
            .await
            .unwrap();

        // one initial connect plus three refused retries
        assert_eq!(connector.calls(), 4);
        assert_eq!(channel.reconnect_attempts(), 3);
        // linear backoff: 100 + 200 + 300 ms
        assert!(started.elapsed() >= Duration::from_millis(600));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.calls(), 4);

        connector.push_script(Script::Accept);
        channel.connect().await;
        assert_eq!(channel.state(), ChannelState::Connected);
        assert_eq!(channel.reconnect_attempts(), 0);
        channel.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_resets_counter_on_success() {
        let (connector, mut accepted) = ScriptedConnector::new(vec![
            Script::Accept,
            Script::Refuse,
            Script::Accept,
        ]);
        let channel = channel(FixedToken::some(), connector.clone(), 5);
        let mut changes = channel.state_changes();

        channel.connect().await;
        drop(accepted.recv().await.unwrap());

        changes
            .wait_for(|s| *s == ChannelState::Reconnecting)
            .await
            .unwrap();
        let _second = accepted.recv().await.unwrap();
        changes
            .wait_for(|s| *s == ChannelState::Connected)
            .await
            .unwrap();

        assert_eq!(connector.calls(), 3);
        assert_eq!(channel.reconnect_attempts(), 0);
        channel.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let (connector, mut accepted) = ScriptedConnector::new(vec![Script::Accept]);
        let channel = channel(FixedToken::some(), connector.clone(), 5);
        let mut changes = channel.state_changes();

        channel.connect().await;
        drop(accepted.recv().await.unwrap());
        changes
            .wait_for(|s| *s == ChannelState::Reconnecting)
            .await
            .unwrap();

        channel.disconnect().await;
        assert_eq!(channel.state(), ChannelState::Disconnected);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_token_abandons_reconnect() {
        let provider = FixedToken::some();
        let (connector, mut accepted) = ScriptedConnector::new(vec![Script::Accept, Script::Accept]);
        let channel = channel(provider.clone(), connector.clone(), 5);
        let mut changes = channel.state_changes();

        channel.connect().await;
        *provider.0.lock().unwrap() = None;
        drop(accepted.recv().await.unwrap());

        changes
            .wait_for(|s| *s == ChannelState::Disconnected)
            .await
            .unwrap();
        assert_eq!(connector.calls(), 1);
    }

    #[tokio::test]
    async fn disconnect_clears_subscriptions_and_is_idempotent() {
        let (connector, _accepted) = ScriptedConnector::new(vec![Script::Accept]);
        let channel = channel(FixedToken::some(), connector, 3);
        let handle = channel.on("analysis:progress", callback(|_| {}));

        channel.connect().await;
        channel.disconnect().await;
        channel.disconnect().await;

        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert!(!handle.unsubscribe());
    }
}
