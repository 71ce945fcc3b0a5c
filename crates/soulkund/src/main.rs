//! Soulkun daemon - conversational business assistant.
//!
//! Receives chat webhooks, routes every message through the Brain
//! decision/authorization pipeline, and replies.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use soulkund::brain::authority::{MemoryAuthority, ValueAuthority};
use soulkund::brain::executor::ToolExecutor;
use soulkund::brain::gate::AuthorizationGate;
use soulkund::brain::guardian::Guardian;
use soulkund::brain::intent::IntentEngine;
use soulkund::brain::learning::LearningLayer;
use soulkund::brain::{Brain, BrainDeps};
use soulkund::channels::{ChannelAdapter, ChatworkChannel, TelegramChannel};
use soulkund::config::Config;
use soulkund::llm::{LlmProvider, OllamaProvider};
use soulkund::server::{router, AppState};
use soulkund::state::create_shared_state;
use soulkund::storage::{NullStorage, SqliteStorage, Storage};
use soulkund::tools::default_catalog;
use soulkund::workers::spawn_reminder_worker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Soulkun daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::load();

    let (storage, storage_label): (Arc<dyn Storage>, &str) = if config.storage.db_path.is_empty() {
        info!("No database path configured, running with null storage");
        (Arc::new(NullStorage), "null")
    } else {
        let storage = SqliteStorage::open(PathBuf::from(&config.storage.db_path))
            .await
            .context("failed to open storage")?;
        (Arc::new(storage), "sqlite")
    };

    let llm: Arc<dyn LlmProvider> = Arc::new(OllamaProvider::new(
        &config.llm.endpoint,
        &config.llm.intent_model,
    ));

    let catalog = Arc::new(default_catalog(Arc::clone(&storage)));
    info!("Tool catalog ready with {} tools", catalog.len());

    let (learning, _learning_handle) = LearningLayer::spawn(Arc::clone(&storage));

    let gate = AuthorizationGate::new(
        Guardian::new(),
        Arc::new(ValueAuthority),
        Arc::new(MemoryAuthority),
        config.brain.confirm_threshold,
        learning.clone(),
    );

    let executor = ToolExecutor::new(
        Arc::clone(&catalog),
        Arc::clone(&storage),
        config.brain.handler_timeout_secs,
    );

    let intent = Arc::new(IntentEngine::new(
        Arc::clone(&llm),
        config.llm.clone(),
        config.brain.fallback_reply.clone(),
    ));

    let brain = Arc::new(Brain::new(
        BrainDeps {
            storage: Arc::clone(&storage),
            catalog,
            intent,
            llm,
            gate,
            executor,
            learning,
        },
        config.brain.clone(),
    ));

    let chatwork = Arc::new(ChatworkChannel::new(config.chatwork.clone()));
    let telegram = Arc::new(TelegramChannel::new(config.telegram.clone()));

    let reminder_channels: Vec<Arc<dyn ChannelAdapter>> =
        vec![Arc::clone(&chatwork) as _, Arc::clone(&telegram) as _];
    let _reminder_worker = spawn_reminder_worker(Arc::clone(&storage), reminder_channels);

    let state = AppState {
        brain,
        daemon: create_shared_state(&config.llm.intent_model, storage_label),
        org: Arc::new(config.org.clone()),
        chatwork,
        telegram,
    };

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;
    info!("Listening on {}", config.server.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down gracefully");
        })
        .await?;

    Ok(())
}
