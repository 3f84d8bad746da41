// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use quill_chat::{ChatPort, ConsolePort};
use quill_config::{DataPaths, SettingsStore};
use quill_core::agent::{AgentDriver, InProcessDriver, MockAgentDriver, SubprocessDriver};
use quill_core::{Aggregator, ContextStore, Handlers, RateLimiter, Router, ServiceDeps};
use quill_hub::HubClient;
use quill_model::OpenAiCompatBackend;
use quill_store::{BindingStore, CredentialStore, ModeStore, ProcessedLog};
use quill_sync::KbSyncManager;
use quill_tools::ToolContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut cli = Cli::parse();
    match cli.command.take() {
        Some(Commands::Hub {
            port,
            data_dir,
            log_dir,
        }) => run_hub(port, data_dir, log_dir, cli.verbose).await,
        Some(Commands::CheckConfig) => check_config(cli.config.as_deref()),
        Some(Commands::Run) | None => run_bot(cli).await,
    }
}

/// File-based logging with an optional stderr mirror.  The returned guard
/// must stay alive for the lifetime of the process or buffered log lines
/// are lost.
fn init_logging(
    log_dir: &std::path::Path,
    file_name: &str,
    verbose: bool,
) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log dir {}", log_dir.display()))?;
    let appender = tracing_appender::rolling::never(log_dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_env("QUILL_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if verbose {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    } else {
        registry.init();
    }
    Ok(guard)
}

// ── `quill run` ───────────────────────────────────────────────────────────────

async fn run_bot(cli: Cli) -> anyhow::Result<()> {
    let config_values = quill_config::load_config_file(cli.config.as_deref())
        .context("loading configuration")?;

    // The fixed-layout roots are readonly settings: resolvable without the
    // overlay store, which itself lives under the data dir.
    let bootstrap = SettingsStore::new(
        config_values.clone(),
        quill_config::OverlayStore::new("data/user_settings_overrides.json"),
    );
    let paths = DataPaths::new(
        bootstrap.get_path(None, "DATA_DIR")?,
        bootstrap.get_path(None, "KB_ROOT_DIR")?,
        bootstrap.get_path(None, "LOG_DIR")?,
    );
    paths.ensure_layout().context("creating data layout")?;

    let _log_guard = init_logging(&paths.log_dir, "bot.log", cli.verbose)?;
    info!(version = env!("CARGO_PKG_VERSION"), "quill starting");

    let settings = SettingsStore::new(
        config_values,
        quill_config::OverlayStore::new(paths.settings_overrides()),
    );

    let credentials = CredentialStore::from_env(paths.credentials())
        .context("credential store (set QUILL_CREDENTIAL_KEY to 64 hex chars)")?;
    let bindings = BindingStore::new(paths.kb_bindings());
    let modes = ModeStore::new(paths.user_modes());
    let processed = ProcessedLog::new(paths.processed_log());

    // Hub: external when configured, bundled child process otherwise.
    let (hub, _bundled_hub) = connect_hub(&settings, &paths).await;

    let chat: Arc<dyn ChatPort> = Arc::new(ConsolePort::new());
    let driver = build_driver(&settings, hub.clone(), &paths)?;

    let (group_tx, group_rx) = tokio::sync::mpsc::channel(64);
    let aggregator = Arc::new(Aggregator::new(group_tx));

    let deps = Arc::new(ServiceDeps {
        settings: settings.clone(),
        bindings: bindings.clone(),
        credentials: credentials.clone(),
        sync: Arc::new(KbSyncManager::new()),
        chat: chat.clone(),
        driver,
        hub,
        contexts: Arc::new(ContextStore::new()),
        limiter: Arc::new(RateLimiter::new()),
    });
    let router = Arc::new(Router::new(deps, processed, modes.clone()));
    tokio::spawn(router.run(group_rx));

    let handlers = Handlers {
        settings,
        bindings,
        credentials,
        modes,
        registry: quill_hub::ServerRegistry::new(paths.mcp_servers_dir()),
        chat,
        aggregator,
        paths,
    };

    let (event_tx, mut event_rx) = tokio::sync::mpsc::channel(64);
    tokio::spawn(ConsolePort::run_input_loop(event_tx));

    info!("quill is up; reading events from the console transport");
    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(event) => handlers.handle_event(event).await,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }
    Ok(())
}

/// Resolve the hub connection per configuration.  Failures degrade to
/// `None` — the bot keeps working without memory/vector tools.
async fn connect_hub(
    settings: &SettingsStore,
    paths: &DataPaths,
) -> (Option<Arc<HubClient>>, Option<quill_hub::BundledHub>) {
    let external_url = settings
        .get_string(None, "MCP_HUB_URL")
        .unwrap_or_default();
    let sse_timeout = Duration::from_secs(
        settings
            .get_i64(None, "MCP_SSE_TIMEOUT_SECS")
            .unwrap_or(10) as u64,
    );

    if !external_url.is_empty() {
        match HubClient::connect(&external_url, sse_timeout).await {
            Ok(client) => {
                info!(url = %external_url, "connected to external hub");
                return (Some(Arc::new(client)), None);
            }
            Err(e) => {
                warn!("external hub unavailable, continuing without it: {e}");
                return (None, None);
            }
        }
    }

    let port = settings.get_i64(None, "MCP_HUB_PORT").unwrap_or(8765) as u16;
    match quill_hub::spawn_bundled_hub(port, &paths.data_dir, &paths.log_dir, Duration::from_secs(15))
        .await
    {
        Ok(bundled) => match HubClient::connect(&bundled.base_url, sse_timeout).await {
            Ok(client) => {
                info!(url = %bundled.base_url, "bundled hub connected");
                (Some(Arc::new(client)), Some(bundled))
            }
            Err(e) => {
                warn!("bundled hub handshake failed, continuing without it: {e}");
                (None, Some(bundled))
            }
        },
        Err(e) => {
            warn!("could not launch bundled hub, continuing without it: {e}");
            (None, None)
        }
    }
}

/// Instantiate the configured agent driver.
fn build_driver(
    settings: &SettingsStore,
    hub: Option<Arc<HubClient>>,
    paths: &DataPaths,
) -> anyhow::Result<Arc<dyn AgentDriver>> {
    let kind = settings.get_string(None, "AGENT_KIND")?;
    match kind.as_str() {
        "openai" => {
            let api_key = settings.get_string(None, "AGENT_API_KEY")?;
            let backend = OpenAiCompatBackend::new(
                &settings.get_string(None, "AGENT_BASE_URL")?,
                settings.get_string(None, "AGENT_MODEL")?,
                (!api_key.is_empty()).then_some(api_key),
                Duration::from_secs(settings.get_i64(None, "AGENT_TIMEOUT_SECS")? as u64),
            )
            .map_err(|e| anyhow::anyhow!("model backend: {e}"))?;

            // Per-invocation tool wiring: tokens and knobs are re-read so
            // overlay changes apply on the next run.
            let factory_settings = settings.clone();
            let factory: quill_core::agent::ContextFactory = Arc::new(move |inv| {
                let s = &factory_settings;
                let uid = Some(inv.user_id);
                let optional = |name: &str| {
                    s.get_string(uid, name)
                        .ok()
                        .filter(|v| !v.is_empty())
                };
                Arc::new(ToolContext {
                    user_id: inv.user_id,
                    kb_name: inv.kb_name.clone(),
                    kb_root: inv.kb_root.clone(),
                    working_dir: inv.working_dir.clone(),
                    hub: hub.clone(),
                    github_token: optional("GITHUB_API_TOKEN"),
                    web_search_key: optional("WEB_SEARCH_API_KEY"),
                    vector_top_k: s.get_i64(uid, "VECTOR_TOP_K").unwrap_or(5) as usize,
                    http_timeout: Duration::from_secs(
                        s.get_i64(uid, "HTTP_TIMEOUT_SECS").unwrap_or(30) as u64,
                    ),
                })
            });
            Ok(Arc::new(InProcessDriver::new(Arc::new(backend), factory)))
        }
        "subprocess" => {
            let command = settings.get_string(None, "AGENT_CLI_COMMAND")?;
            let mcp_config = paths.data_dir.join("client_configs/standard.json");
            Ok(Arc::new(SubprocessDriver::new(
                command,
                Vec::new(),
                mcp_config.exists().then_some(mcp_config),
            )))
        }
        "mock" => Ok(Arc::new(MockAgentDriver::new(Vec::new()))),
        other => anyhow::bail!("unknown AGENT_KIND: {other}"),
    }
}

// ── `quill hub` ───────────────────────────────────────────────────────────────

async fn run_hub(
    port: u16,
    data_dir: std::path::PathBuf,
    log_dir: std::path::PathBuf,
    verbose: bool,
) -> anyhow::Result<()> {
    let _log_guard = init_logging(&log_dir, "mcp_hub.log", verbose)?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;

    let base_url = format!("http://127.0.0.1:{port}");
    // The hub, not the bot, owns its client-config artifacts.
    quill_hub::config_gen::write_client_configs(&data_dir, &base_url)
        .map_err(|e| anyhow::anyhow!("writing client configs: {e}"))?;

    let state = quill_hub::HubState::new(
        quill_hub::MemoryStore::new(data_dir.join("memory")),
        quill_hub::VectorIndex::new(data_dir.join("memory")),
        quill_hub::ServerRegistry::new(data_dir.join("mcp_servers")),
        base_url.clone(),
    );
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("binding {base_url}"))?;
    info!(%base_url, "hub starting");
    quill_hub::serve(state, listener).await.context("hub server")
}

// ── `quill check-config` ──────────────────────────────────────────────────────

fn check_config(config: Option<&std::path::Path>) -> anyhow::Result<()> {
    let values = quill_config::load_config_file(config).context("loading configuration")?;
    let store = SettingsStore::new(
        values,
        quill_config::OverlayStore::new("data/user_settings_overrides.json"),
    );
    for info in store.describe(None, None).map_err(|e| anyhow::anyhow!("{e}"))? {
        let mut flags = String::new();
        if info.readonly {
            flags.push_str(" [readonly]");
        }
        if info.secret {
            flags.push_str(" [secret]");
        }
        println!("{:<28} = {} ({}){}", info.name, info.value, info.ty, flags);
    }
    Ok(())
}
