use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::time::Duration;

use clap::{ArgGroup, Parser};
use throttle_server::{Server, ServerConfig, Transport};
use throttle_store::State;
use tracing::{error, info};

/// Low-latency counter and key/value throttling daemon.
#[derive(Parser)]
#[command(name = "throttled")]
#[command(group(ArgGroup::new("listen").required(true).args(["port", "socket"])))]
struct Args {
    /// TCP port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Local stream socket path to listen on.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Worker pool size. Falls back to the `THREADS` environment variable,
    /// then one worker per core.
    #[arg(long)]
    threads: Option<usize>,

    /// Path to restore storage from on startup and dump it to on shutdown.
    #[arg(long)]
    dump: Option<PathBuf>,

    /// Enables restore-on-boot/dump-on-shutdown against `--dump`'s path.
    #[arg(long, requires = "dump")]
    persistent: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let state = Arc::new(State::new());

    if args.persistent {
        if let Some(path) = &args.dump {
            match state.restore(path) {
                Ok(()) => info!(?path, "restored storage from dump"),
                Err(err) => info!(?path, %err, "no usable dump to restore from, starting empty"),
            }
        }
    }

    let transport = match (args.port, &args.socket) {
        (Some(port), None) => Transport::Tcp(SocketAddr::from(([0, 0, 0, 0], port))),
        (None, Some(path)) => Transport::Unix(path.clone()),
        _ => unreachable!("--port/--socket are a required, mutually exclusive clap group"),
    };

    let server = match Server::start(state.clone(), ServerConfig { transport, threads: args.threads }) {
        Ok(server) => server,
        Err(err) => {
            error!(%err, "failed to start server");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handle = shutdown.clone();
    if let Err(err) = ctrlc::set_handler(move || shutdown_handle.store(true, Relaxed)) {
        error!(%err, "failed to install signal handler, relying on external kill -9");
    }

    while !shutdown.load(Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("shutdown signal received");
    if args.persistent {
        if let Some(path) = &args.dump {
            if let Err(err) = state.dump(path) {
                error!(%err, ?path, "failed to dump storage on shutdown");
            }
        }
    }
    server.stop();

    ExitCode::SUCCESS
}
