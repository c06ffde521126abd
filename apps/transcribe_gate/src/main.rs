mod pipeline;
mod transcript;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, DefaultBodyLimit, Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use keysieve_core::{BloomFilter, KeyGate, KeyList};
use rand::Rng;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::pipeline::{Scratch, Toolchain};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Speech-to-text gateway guarded by an API key allowlist")]
pub struct Config {
    #[arg(long, env = "TRANSCRIBE_GATE_ADDR", default_value = "0.0.0.0:8081")]
    addr: String,

    /// JSON array of allowed API keys
    #[arg(long, env = "TRANSCRIBE_GATE_KEYS", default_value = "allowed_keys.json")]
    keys: PathBuf,

    /// Prebuilt Bloom pre-filter for the keys (built in memory when absent)
    #[arg(long, env = "TRANSCRIBE_GATE_FILTER")]
    filter: Option<PathBuf>,

    #[arg(long, env = "TRANSCRIBE_GATE_FP_RATE", default_value_t = 0.001)]
    fp_rate: f64,

    #[arg(long, env = "TRANSCRIBE_GATE_MODEL", default_value = "whisper.cpp/models/ggml-base.en.bin")]
    model: PathBuf,

    #[arg(long, env = "TRANSCRIBE_GATE_WHISPER_BIN", default_value = "whisper.cpp/build/bin/whisper-cli")]
    whisper_bin: PathBuf,

    #[arg(long, env = "TRANSCRIBE_GATE_FFMPEG_BIN", default_value = "ffmpeg")]
    ffmpeg_bin: PathBuf,

    #[arg(long, env = "TRANSCRIBE_GATE_UPLOADS_DIR", default_value = "uploads")]
    uploads_dir: PathBuf,

    #[arg(long, env = "TRANSCRIBE_GATE_TRANSCRIPT_LOG", default_value = "tra.txt")]
    transcript_log: PathBuf,

    #[arg(long, env = "TRANSCRIBE_GATE_SEGMENT_SECS", default_value_t = 5)]
    segment_secs: u32,

    #[arg(long, env = "TRANSCRIBE_GATE_MAX_UPLOAD_MB", default_value_t = 100)]
    max_upload_mb: usize,
}

#[derive(Clone)]
struct AppState {
    gate: Arc<KeyGate>,
    tools: Arc<Toolchain>,
    uploads_dir: PathBuf,
    transcript_log: PathBuf,
}

impl AppState {
    fn from_config(cfg: &Config) -> Result<Self> {
        if !cfg.keys.exists() {
            return Err(anyhow!("allowlist {} not found", cfg.keys.display()));
        }
        let keys = KeyList::load(&cfg.keys)
            .with_context(|| format!("Failed to load API keys from {}", cfg.keys.display()))?;
        if keys.is_empty() {
            warn!(path = %cfg.keys.display(), "allowlist is empty; every request will be rejected");
        }
        let gate = match &cfg.filter {
            Some(p) => {
                let filter = BloomFilter::load(p)
                    .with_context(|| format!("Failed to load key filter {}", p.display()))?;
                KeyGate::with_filter(keys, filter)
            }
            None => KeyGate::new(keys, cfg.fp_rate)?,
        };
        info!(
            keys = gate.keys().len(),
            filter_bits = gate.filter().size(),
            filter_k = gate.filter().k(),
            "allowlist loaded"
        );
        Ok(Self {
            gate: Arc::new(gate),
            tools: Arc::new(Toolchain {
                ffmpeg: cfg.ffmpeg_bin.clone(),
                whisper: cfg.whisper_bin.clone(),
                model: cfg.model.clone(),
                segment_secs: cfg.segment_secs,
            }),
            uploads_dir: cfg.uploads_dir.clone(),
            transcript_log: cfg.transcript_log.clone(),
        })
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/transcribe", post(transcribe).fallback(wrong_method))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cfg = Config::parse();
    let state = AppState::from_config(&cfg)?;
    let app = router(state, cfg.max_upload_mb.saturating_mul(1024 * 1024));
    let listener = TcpListener::bind(&cfg.addr)
        .await
        .with_context(|| format!("bind {}", cfg.addr))?;
    info!(addr = %cfg.addr, "server running");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

fn upload_id() -> String {
    let now = time::OffsetDateTime::now_utc();
    let secs = now.unix_timestamp();
    let nanos = now.nanosecond();
    let r: u16 = rand::rng().random();
    format!("{secs}-{nanos:09}-{r:04x}")
}

fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

async fn healthz() -> &'static str {
    "OK"
}

async fn wrong_method() -> Response {
    (StatusCode::METHOD_NOT_ALLOWED, "Use POST with a file field named 'audio'").into_response()
}

struct Upload {
    api_key: String,
    audio: Option<(String, Bytes)>,
}

async fn read_upload(multipart: &mut Multipart) -> Result<Upload, axum::extract::multipart::MultipartError> {
    let mut up = Upload { api_key: String::new(), audio: None };
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("apikey") => up.api_key = field.text().await?,
            Some("audio") => {
                let file_name = field.file_name().unwrap_or("upload").to_owned();
                let data = field.bytes().await?;
                up.audio = Some((file_name, data));
            }
            _ => {}
        }
    }
    Ok(up)
}

async fn transcribe(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut multipart: Multipart,
) -> Response {
    let up = match read_upload(&mut multipart).await {
        Ok(up) => up,
        Err(e) => {
            debug!(%peer, "bad multipart body: {e}");
            return (StatusCode::BAD_REQUEST, "Malformed multipart body").into_response();
        }
    };

    let Upload { api_key, audio } = up;
    if !state.gate.check(&api_key) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized: Invalid or missing API key").into_response();
    }

    let Some((file_name, data)) = audio else {
        return (StatusCode::BAD_REQUEST, "Audio file is required").into_response();
    };

    let id = upload_id();
    let scratch = Scratch::new(
        state.uploads_dir.join(format!("{id}{}", extension_of(&file_name))),
        state.uploads_dir.join(format!("{id}_chunks")),
    );

    let saved = async {
        tokio::fs::create_dir_all(&scratch.chunks).await?;
        tokio::fs::write(&scratch.upload, &data).await
    }
    .await;
    if let Err(e) = saved {
        error!(path = %scratch.upload.display(), "save upload: {e}");
        scratch.cleanup().await;
        return (StatusCode::INTERNAL_SERVER_ERROR, "Unable to save file").into_response();
    }

    let chunks = match state.tools.split(&scratch.upload, &scratch.chunks).await {
        Ok(c) => c,
        Err(e) => {
            error!(%id, "split: {e:#}");
            scratch.cleanup().await;
            return (StatusCode::INTERNAL_SERVER_ERROR, "Audio splitting failed").into_response();
        }
    };
    info!(%id, %peer, file = %file_name, chunks = chunks.len(), "transcription started");

    let (tx, rx) = mpsc::channel::<Result<String, Infallible>>(8);
    tokio::spawn(async move {
        let mut parts: Vec<String> = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let line = match state.tools.transcribe(chunk).await {
                Ok(text) => {
                    let line = serde_json::json!({ "transcription": text });
                    parts.push(text);
                    line
                }
                Err(e) => {
                    warn!(%id, chunk = %chunk.display(), "transcribe: {e:#}");
                    serde_json::json!({ "error": "Transcription failed" })
                }
            };
            if tx.send(Ok(format!("{line}\n"))).await.is_err() {
                debug!(%id, "client went away");
                break;
            }
        }

        let entry = transcript::log_entry(
            time::OffsetDateTime::now_utc(),
            &peer.to_string(),
            &api_key,
            &file_name,
            &parts.join(" "),
        );
        if let Err(e) = transcript::append_entry(&state.transcript_log, &entry).await {
            error!(path = %state.transcript_log.display(), "Failed to write log: {e}");
        }
        scratch.cleanup().await;
        drop(tx);
    });

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}
