use std::sync::Arc;

/// Subscriber callback for a named push event. Receives the event's `data`.
pub type EventCallback = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

pub fn callback<F>(f: F) -> EventCallback
where
    F: Fn(&serde_json::Value) + Send + Sync + 'static,
{
    Arc::new(f)
}
