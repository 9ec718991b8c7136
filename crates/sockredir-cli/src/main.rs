use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use sockredir::config::Config;
use sockredir::loader::Redirector;
use sockredir::proxy::{accept_loop, AcceptedConnection};

#[derive(Parser)]
#[command(name = "sockredir")]
#[command(about = "Redirect a cgroup's outbound TCP connections to a local proxy")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "sockredir.yaml")]
    config: PathBuf,

    /// Log file directory (enables file logging)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a default configuration file
    Init,
    /// Validate the configuration file
    Validate,
    /// Attach the programs for an external proxy (requires root)
    Attach(Overrides),
    /// Attach with this process as the proxy and log resolved destinations (requires root)
    Listen(Overrides),
}

#[derive(Args)]
struct Overrides {
    /// Proxy process id
    #[arg(long)]
    proxy_pid: Option<u32>,

    /// Proxy listening port
    #[arg(long)]
    proxy_port: Option<u16>,

    /// cgroup v2 directory to attach to
    #[arg(long)]
    cgroup: Option<PathBuf>,
}

impl Overrides {
    fn apply(&self, config: &mut Config) {
        if let Some(pid) = self.proxy_pid {
            config.proxy.pid = Some(pid);
        }
        if let Some(port) = self.proxy_port {
            config.proxy.port = port;
        }
        if let Some(ref path) = self.cgroup {
            config.cgroup.path = path.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(&cli.config, cli.log_dir.as_deref())?;

    match cli.command {
        Commands::Init => cmd_init(&cli.config),
        Commands::Validate => cmd_validate(&cli.config),
        Commands::Attach(ref overrides) => cmd_attach(&cli.config, overrides).await,
        Commands::Listen(ref overrides) => cmd_listen(&cli.config, overrides).await,
    }
}

/// Stderr logging at the configured level (or `info` when the config cannot
/// be loaded yet), plus a daily file under `log_dir` when given. `RUST_LOG`
/// directives still apply on top.
fn init_tracing(config_path: &Path, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = Config::load(config_path)
        .map(|c| c.log.level)
        .unwrap_or_else(|_| "info".to_string());
    let filter =
        EnvFilter::from_default_env().add_directive(format!("sockredir={level}").parse()?);

    let file = log_dir.map(|dir| {
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "sockredir.log"))
    });
    let (file_writer, guard) = match file {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_writer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
        }))
        .init();

    Ok(guard)
}

fn cmd_init(config_path: &Path) -> Result<()> {
    let yaml = serde_yaml::to_string(&Config::default_config())?;

    let mut file = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(config_path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            anyhow::bail!("{} already exists, not overwriting", config_path.display())
        }
        Err(e) => return Err(e.into()),
    };
    file.write_all(yaml.as_bytes())?;

    println!("Wrote default configuration to {}", config_path.display());
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    println!("Configuration is valid.");
    println!("  Proxy: 127.0.0.1:{}", config.proxy.port);
    match config.proxy.pid {
        Some(pid) => println!("  Proxy PID: {}", pid),
        None => println!("  Proxy PID: (not set, required for attach)"),
    }
    println!("  cgroup: {}", config.cgroup.path.display());
    println!("  eBPF object: {}", config.bpf.object.display());
    Ok(())
}

async fn cmd_attach(config_path: &Path, overrides: &Overrides) -> Result<()> {
    let mut config = Config::load(config_path)?;
    overrides.apply(&mut config);

    let Some(proxy_pid) = config.proxy.pid else {
        anyhow::bail!("proxy pid is required: set proxy.pid or pass --proxy-pid");
    };

    let redirector = Redirector::attach(&config, proxy_pid)?;
    tracing::info!("redirect active, press Ctrl+C to detach");

    hold_until_shutdown(&redirector, config.bpf.usage_interval_secs).await?;
    tracing::info!("shutting down...");
    Ok(())
}

async fn cmd_listen(config_path: &Path, overrides: &Overrides) -> Result<()> {
    let mut config = Config::load(config_path)?;
    overrides.apply(&mut config);

    // Bind first so redirected connections have somewhere to land.
    let listener = TcpListener::bind(("127.0.0.1", config.proxy.port)).await?;
    tracing::info!(port = config.proxy.port, "proxy listener bound");

    let redirector = Redirector::attach(&config, std::process::id())?;

    let (tx, mut rx) = mpsc::channel::<AcceptedConnection>(256);
    let handle = tokio::spawn(accept_loop(listener, tx));
    tracing::info!("listening, press Ctrl+C to stop");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(conn) = rx.recv() => report(conn),
            _ = &mut shutdown => {
                tracing::info!("shutting down listener...");
                break;
            }
        }
    }

    handle.abort();
    log_usage(&redirector);
    Ok(())
}

/// Log the resolution result and drop the connection; nothing is forwarded.
fn report(conn: AcceptedConnection) {
    match conn.original_dst {
        Some(dst) => {
            tracing::info!(peer = %conn.peer, original_dst = %dst, "resolved original destination")
        }
        None => tracing::warn!(peer = %conn.peer, "original destination unavailable"),
    }
}

async fn hold_until_shutdown(redirector: &Redirector, interval_secs: u64) -> Result<()> {
    if interval_secs == 0 {
        tokio::signal::ctrl_c().await?;
        return Ok(());
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => log_usage(redirector),
            res = &mut shutdown => return res.map_err(Into::into),
        }
    }
}

fn log_usage(redirector: &Redirector) {
    let proxy = redirector.proxy();
    let cgroup = redirector.cgroup().display();
    match redirector.table_usage() {
        Ok(usage) => tracing::debug!(
            cgroup = %cgroup,
            proxy_port = proxy.proxy_port,
            sockets = usage.sockets,
            ports = usage.ports,
            peers = usage.peers,
            "correlation table usage"
        ),
        Err(e) => tracing::warn!(cgroup = %cgroup, error = %e, "failed to read table usage"),
    }
}
