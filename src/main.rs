use std::sync::Arc;

use anyhow::Context;
use secrecy::ExposeSecret;

use stego_worker::api::{AppState, router};
use stego_worker::config::WorkerConfig;
use stego_worker::handlers::HandlerDeps;
use stego_worker::jobs::{InMemoryJobStore, JobService, spawn_retention_task};
use stego_worker::process::Mp3StegoTool;
use stego_worker::workspace::Workspace;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = WorkerConfig::from_env();
    config.validate()?;

    eprintln!("🔐 Stego Worker v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Port: {}", config.port);
    eprintln!("   Encoder: {}", config.encode_exe.display());
    eprintln!("   Decoder: {}", config.decode_exe.display());
    eprintln!("   Work root: {}", config.work_root.display());
    if let Some(dir) = &config.support_dir {
        eprintln!("   Support files: {}", dir.display());
    }
    if let Some(list) = &config.default_wordlist {
        eprintln!("   Default wordlist: {}", list.display());
    }
    if config.token_generated {
        eprintln!("   Token (generated): {}", config.token.expose_secret());
    }

    // ── Job service ─────────────────────────────────────────────────────
    let workspace =
        Workspace::new(config.work_root.clone()).with_support_dir(config.support_dir.clone());
    workspace
        .ensure_dirs()
        .await
        .with_context(|| format!("creating {}", config.work_root.display()))?;

    let tool = Mp3StegoTool::new(config.encode_exe.clone(), config.decode_exe.clone());
    let deps = HandlerDeps::new(Arc::new(tool)).with_trial_timeout(config.trial_timeout);
    let service = Arc::new(
        JobService::new(InMemoryJobStore::new(), deps, workspace)
            .with_default_wordlist(config.default_wordlist.clone()),
    );

    if let Some(retention) = config.job_retention {
        let _retention_handle = spawn_retention_task(Arc::clone(&service), retention);
        eprintln!("   Job retention: {}s", retention.as_secs());
    }

    // ── HTTP ────────────────────────────────────────────────────────────
    let state = AppState::new(service, config.token.clone())
        .with_stream_config(config.stream.clone())
        .with_max_upload_bytes(config.max_upload_bytes);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    tracing::info!(port = config.port, "Worker listening");
    eprintln!("   Listening on http://0.0.0.0:{}\n", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown requested");
        })
        .await?;

    Ok(())
}
