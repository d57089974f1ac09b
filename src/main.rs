//! Deobfuscation MCP Server
//!
//! This binary serves the deobfuscation tools over stdio (default) or
//! streamable HTTP. Logs go to stderr; stdout belongs to the stdio transport.

use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use deob_mcp::config::{
    DEFAULT_OUTPUT_EXTENSION, DEFAULT_REAP_INTERVAL_SECS, DEFAULT_SESSION_IDLE_TIMEOUT_SECS,
};
use deob_mcp::{AnalyzerRegistry, DeobMcpServer, DeobfuscationService, PublishMode, ServiceConfig};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::http::{header::ORIGIN, Request, Response, StatusCode};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use rmcp::transport::stdio;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use rmcp::ServiceExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_service::Service;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "deob-mcp", version, about = "Session-scoped deobfuscation MCP server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    #[command(flatten)]
    service: ServiceArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Run the MCP server over stdio (default)
    Serve,
    /// Run the MCP server over Streamable HTTP (SSE)
    ServeHttp(ServeHttpArgs),
}

#[derive(Args, Debug)]
struct ServiceArgs {
    /// How save_deobfuscated hands back the module
    #[arg(long, value_enum, default_value_t = PublishMode::Resource, global = true)]
    publish_mode: PublishMode,
    /// Extension replacing the input's extension in output paths
    #[arg(long, default_value = DEFAULT_OUTPUT_EXTENSION, global = true)]
    output_extension: String,
    /// Evict sessions idle for this many seconds (0 disables)
    #[arg(long, default_value_t = DEFAULT_SESSION_IDLE_TIMEOUT_SECS, global = true)]
    session_idle_timeout_secs: u64,
    /// Seconds between idle-session sweeps
    #[arg(long, default_value_t = DEFAULT_REAP_INTERVAL_SECS, global = true)]
    reap_interval_secs: u64,
}

impl ServiceArgs {
    fn into_config(self) -> ServiceConfig {
        let output_extension = self.output_extension.trim_start_matches('.');
        ServiceConfig {
            publish_mode: self.publish_mode,
            output_extension: if output_extension.is_empty() {
                DEFAULT_OUTPUT_EXTENSION.to_string()
            } else {
                output_extension.to_string()
            },
            session_idle_timeout: (self.session_idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.session_idle_timeout_secs)),
            // tokio intervals must be non-zero
            reap_interval: Duration::from_secs(self.reap_interval_secs.max(1)),
        }
    }
}

#[derive(Args)]
struct ServeHttpArgs {
    /// Bind address (e.g., 127.0.0.1:8765)
    #[arg(long, default_value = "127.0.0.1:8765")]
    bind: String,
    /// SSE keep-alive interval in seconds (0 disables)
    #[arg(long, default_value_t = 15)]
    sse_keep_alive_secs: u64,
    /// Allowed Origin values (comma-separated). Defaults to localhost only.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "http://localhost,http://127.0.0.1"
    )]
    allow_origin: Vec<String>,
}

#[derive(Clone)]
struct OriginCheckService<S> {
    inner: S,
    allowed_origins: Arc<std::collections::HashSet<String>>,
}

impl<S> OriginCheckService<S> {
    fn new(inner: S, allowed_origins: Arc<std::collections::HashSet<String>>) -> Self {
        Self {
            inner,
            allowed_origins,
        }
    }
}

impl<B, S> Service<Request<B>> for OriginCheckService<S>
where
    B: http_body::Body + Send + 'static,
    B::Error: std::fmt::Display,
    S: Service<
            Request<B>,
            Response = Response<BoxBody<Bytes, std::convert::Infallible>>,
            Error = std::convert::Infallible,
        > + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, std::convert::Infallible>>;
    type Error = std::convert::Infallible;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let allowed_origins = self.allowed_origins.clone();
        let mut inner = self.inner.clone();
        Box::pin(async move {
            if let Some(origin) = req.headers().get(ORIGIN).and_then(|v| v.to_str().ok()) {
                if !allowed_origins.contains(origin) {
                    let mut resp = Response::new(Full::new(Bytes::from("Forbidden")).boxed());
                    *resp.status_mut() = StatusCode::FORBIDDEN;
                    return Ok(resp);
                }
            }
            inner.call(req).await
        })
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize logging to stderr (stdout is used for MCP protocol)
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("deob_mcp=info")))
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Serve);
    let config = cli.service.into_config();
    info!(
        publish_mode = ?config.publish_mode,
        output_extension = %config.output_extension,
        idle_timeout_secs = config.session_idle_timeout.map(|d| d.as_secs()),
        "Service configured"
    );
    let service = Arc::new(DeobfuscationService::new(
        AnalyzerRegistry::builtin(),
        config,
    ));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(async move {
        match command {
            Command::Serve => run_server(service).await,
            Command::ServeHttp(args) => run_server_http(service, args).await,
        }
    });
    if let Err(err) = &result {
        error!("Server error: {err}");
    }
    info!("Server stopped");
    result
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
            _ = sigquit.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

/// Cancel `cancel` once a shutdown signal arrives.
fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        if wait_for_shutdown_signal().await.is_ok() {
            info!("Shutdown signal received");
            cancel.cancel();
        } else {
            info!("Shutdown signal handler failed; server will continue running");
        }
    });
}

fn spawn_session_reaper(service: &DeobfuscationService, cancel: CancellationToken) {
    let config = service.config();
    if let Some(max_idle) = config.session_idle_timeout {
        info!(
            idle_timeout_secs = max_idle.as_secs(),
            interval_secs = config.reap_interval.as_secs(),
            "Idle session reaper started"
        );
        tokio::spawn(
            service
                .manager()
                .clone()
                .run_reaper(max_idle, config.reap_interval, cancel),
        );
    }
}

async fn run_server(service: Arc<DeobfuscationService>) -> anyhow::Result<()> {
    info!("MCP server listening on stdio");
    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());
    spawn_session_reaper(&service, cancel.clone());

    let mut running = Some(DeobMcpServer::new(service).serve(stdio()).await?);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Some(mut running) = running.take() {
                    let _ = running.close().await?;
                }
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                if running.as_ref().is_some_and(|r| r.is_transport_closed()) {
                    if let Some(running) = running.take() {
                        let _ = running.waiting().await?;
                    }
                    break;
                }
            }
        }
    }
    cancel.cancel();
    info!("MCP server shutting down");
    Ok(())
}

async fn run_server_http(
    service: Arc<DeobfuscationService>,
    args: ServeHttpArgs,
) -> anyhow::Result<()> {
    let bind_addr: SocketAddr = args
        .bind
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {e}"))?;

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());
    spawn_session_reaper(&service, cancel.clone());

    let config = StreamableHttpServerConfig {
        sse_keep_alive: if args.sse_keep_alive_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(args.sse_keep_alive_secs))
        },
        sse_retry: None,
        // Pipelines live in sessions; stateless requests would each get a new one.
        stateful_mode: true,
        cancellation_token: cancel.child_token(),
    };

    let http_service = StreamableHttpService::new(
        move || Ok(DeobMcpServer::new(service.clone())),
        Arc::new(LocalSessionManager::default()),
        config,
    );
    let allowed_origins: std::collections::HashSet<String> = args
        .allow_origin
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let http_service = OriginCheckService::new(http_service, Arc::new(allowed_origins));

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("bind failed: {e}"))?;
    info!("MCP HTTP server listening on http://{bind_addr}");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("HTTP server shutting down");
                break;
            }
            res = listener.accept() => {
                let (stream, _) = res.map_err(|e| anyhow::anyhow!("accept failed: {e}"))?;
                let svc = http_service.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let conn = http1::Builder::new().serve_connection(
                        io,
                        TowerToHyperService::new(svc),
                    );
                    if let Err(err) = conn.await {
                        error!("http connection error: {err}");
                    }
                });
            }
        }
    }
    Ok(())
}
