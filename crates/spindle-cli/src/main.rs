use serde::Deserialize;
use std::error::Error;
use std::sync::Arc;
use tokio::time::{Duration, sleep, timeout};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use spindle_core::app::{
    DocumentMap, HandleCache, SelectionEngine, create_document, handle, load_document,
    update_document,
};
use spindle_core::cache::Lookup;
use spindle_core::domain::{ResourceUrl, Value};
use spindle_core::impls::InMemoryStore;
use spindle_core::ports::{IdGenerator, ResourceStore, SystemClock, UlidGenerator};

/// Demo settings, read from the JSON file named by `SPINDLE_CONFIG`.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct DemoConfig {
    initial_num: i64,
    updated_num: i64,
    /// How long the simulated peer takes to deliver the remote document.
    remote_delay_ms: u64,
    log_filter: String,
    json_logs: bool,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            initial_num: 42,
            updated_num: 45,
            remote_delay_ms: 20,
            log_filter: "info".to_string(),
            json_logs: false,
        }
    }
}

impl DemoConfig {
    fn load() -> Result<Self, Box<dyn Error>> {
        match std::env::var("SPINDLE_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| format!("read {path}: {e}"))?;
                Ok(serde_json::from_str(&raw).map_err(|e| format!("parse {path}: {e}"))?)
            }
            Err(_) => Ok(Self::default()),
        }
    }
}

fn init_tracing(config: &DemoConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    if config.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn render(selection: &DocumentMap) -> String {
    let json: serde_json::Map<String, serde_json::Value> = selection
        .iter()
        .map(|(url, doc)| {
            let value = doc.as_ref().map_or(serde_json::Value::Null, Value::to_json);
            (url.to_string(), value)
        })
        .collect();
    serde_json::Value::Object(json).to_string()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = DemoConfig::load()?;
    init_tracing(&config);

    // (A) store, handle cache, selection engine
    let store = Arc::new(InMemoryStore::new());
    let cache = HandleCache::new();
    let engine = SelectionEngine::with_defaults(store.clone());

    // (B) create a document and watch it
    let url = create_document(&*store, Value::record([("num", config.initial_num)]));
    let selection = engine.select([url], None)?;
    println!("watching {url}: {}", render(&selection));

    // (C) update it through the resolver
    let doc = load_document(url, &*store, &cache).await?;
    info!(url = %url, doc = %doc.to_json(), "loaded");
    let updated = config.updated_num;
    let mut set_num = |doc: &mut Value| {
        if let Some(num) = doc.field_mut("num") {
            *num = Value::from(updated);
        }
    };
    loop {
        match update_document(url, &*store, &cache, &mut set_num)? {
            Lookup::Ready(()) => break,
            Lookup::Suspended(suspension) => suspension.settled().await,
        }
    }
    println!("after update: {}", render(&engine.selection()));

    // (D) delete it
    store.delete(&url);
    println!("after delete: {}", render(&engine.selection()));

    // (E) a document that only some peer has; it arrives later
    let remote = ResourceUrl::from(UlidGenerator::new(SystemClock).generate_document_id());
    let mut rx = engine.subscribe();
    engine.select([url, remote], None)?;
    rx.mark_unchanged();
    println!("waiting for {remote}: {}", render(&engine.selection()));

    let peer = store.clone();
    let delay = Duration::from_millis(config.remote_delay_ms);
    tokio::spawn(async move {
        sleep(delay).await;
        if let Err(e) = peer.provide(&remote, Value::from("hello from a peer")) {
            tracing::warn!(error = %e, "peer could not deliver");
        }
    });

    timeout(Duration::from_secs(5), rx.changed()).await??;
    println!("remote arrived: {}", render(&rx.borrow_and_update()));
    let remote_handle = handle(remote, &*store, &cache).await?;
    info!(url = %remote_handle.url(), state = %remote_handle.state(), "resolved");

    // (F) counters
    println!("selection stats: {:?}", engine.stats());
    println!("cache counts: {:?}", cache.counts_by_status());

    engine.close();
    Ok(())
}
