//! Combined HTTP/WebSocket server.
//!
//! One axum router serves the voice WebSocket channel and the TTS job API.
//! Process-wide singletons (model registry, verification gate, LLM
//! corrector, hotwords, audit sink, TTS manager) live in the shared state;
//! per-connection session state is owned by each WebSocket task.

pub mod messages;
pub mod tts_api;
pub mod voice_ws;

use crate::audio::AuditSink;
use crate::config::ServiceConfig;
use crate::correct::hotwords::HotwordList;
use crate::correct::llm::LlmCorrector;
use crate::error::Result;
use crate::models::ModelRegistry;
use crate::models::remote::{RemoteModelGateway, RemoteTtsEngine};
use crate::session::Session;
use crate::sv::VerificationGate;
use crate::tts::{EngineFactory, TtsManager};
use axum::Router;
use axum::routing::{delete, get, post};
use std::sync::Arc;
use tracing::info;

/// Process-wide voice pipeline singletons; the factory for sessions.
pub struct VoiceRuntime {
    /// Full service configuration.
    pub config: ServiceConfig,
    /// Model singletons.
    pub registry: ModelRegistry,
    /// Finalize-time recognition/verification gate.
    pub gate: Arc<VerificationGate>,
    /// LLM correction client.
    pub corrector: Arc<LlmCorrector>,
    /// Hotwords for the LLM pass.
    pub hotword_words: Arc<Vec<String>>,
    /// Audit WAV sink.
    pub audit: AuditSink,
}

impl VoiceRuntime {
    /// Assemble the runtime from config and the model registry.
    #[must_use]
    pub fn new(config: ServiceConfig, registry: ModelRegistry) -> Self {
        let audit = AuditSink::new(config.audit.enabled, config.audit.root_dir.clone());
        let hotwords = HotwordList::load(config.correction.hotwords_path.as_deref());
        info!("{} hotwords active", hotwords.len());
        let gate = Arc::new(VerificationGate::new(
            Arc::clone(&registry.separator),
            Arc::clone(&registry.verifier),
            audit.clone(),
            config.pipeline.sv_threshold,
            hotwords.to_gateway_json(),
            config.pipeline.disable_lm,
        ));
        let corrector = Arc::new(LlmCorrector::new(&config.correction));
        Self {
            registry,
            gate,
            corrector,
            hotword_words: Arc::new(hotwords.words()),
            audit,
            config,
        }
    }

    /// Create the state for one client connection.
    ///
    /// # Errors
    ///
    /// Returns an error when the audit root cannot be created; the handler
    /// maps this to `SESSION_CREATE_ERROR` and closes the socket.
    pub fn new_session(&self) -> Result<Session> {
        std::fs::create_dir_all(&self.config.audit.root_dir)?;
        Ok(Session::new(
            &self.config,
            &self.registry,
            Arc::clone(&self.gate),
            Arc::clone(&self.corrector),
            Arc::clone(&self.hotword_words),
            self.audit.clone(),
        ))
    }
}

/// Shared router state.
#[derive(Clone)]
pub struct AppState {
    /// Voice pipeline singletons.
    pub runtime: Arc<VoiceRuntime>,
    /// TTS job manager.
    pub tts: Arc<TtsManager>,
}

/// Build the service router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/voice/asr/ws", get(voice_ws::upgrade))
        .route("/api/v1/tts/start", post(tts_api::start))
        .route("/api/v1/tts/cancel", post(tts_api::cancel))
        .route("/api/v1/tts/result/{job_id}", get(tts_api::result))
        .route("/api/v1/tts/jobs/{job_id}", delete(tts_api::cleanup))
        .with_state(state)
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({"status": "ok"}))
}

/// Build the production state and serve until the listener fails.
///
/// # Errors
///
/// Returns an error when the model gateway clients cannot be built or the
/// listen address cannot be bound.
pub async fn run(config: ServiceConfig) -> anyhow::Result<()> {
    let gateway = Arc::new(RemoteModelGateway::new(&config.models)?);
    let registry = ModelRegistry {
        vad: Arc::clone(&gateway) as _,
        kws: Arc::clone(&gateway) as _,
        separator: Arc::clone(&gateway) as _,
        verifier: gateway as _,
    };

    let models_config = config.models.clone();
    let engine_factory: EngineFactory = Box::new(move || {
        RemoteTtsEngine::new(&models_config).map(|engine| Arc::new(engine) as _)
    });
    let tts = Arc::new(TtsManager::new(config.tts.clone(), engine_factory));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let runtime = Arc::new(VoiceRuntime::new(config, registry));
    let state = AppState { runtime, tts };

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("nightingale listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
