use std::{net::SocketAddr, path::PathBuf, process::ExitCode};

use clap::Parser;
use proxy_config::RouteTable;
use proxy_core::Dispatcher;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Non-blocking, single-threaded HTTP/1.1 reverse proxy.
#[derive(Debug, Parser)]
#[command(name = "proxy-cli", version)]
struct Args {
    /// TCP port to listen on.
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Path to the route table file (`prefix host port` per line).
    #[arg(long, default_value = "routes.conf")]
    routes: PathBuf,

    /// Listen backlog passed to `listen(2)`.
    #[arg(long, default_value_t = 512)]
    backlog: u32,

    /// Increase log verbosity (stacks; overridden by `RUST_LOG` if set).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);
    mask_sigpipe();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "startup failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let routes = RouteTable::load(&args.routes)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let mut dispatcher = Dispatcher::bind(addr, args.backlog, routes)?;
    dispatcher.run()?;
    Ok(())
}

/// Layers `-v`/`-vv` over `RUST_LOG`, in the style of CLIs that let an
/// explicit `RUST_LOG` win over a verbosity flag default.
fn init_tracing(verbosity: u8) {
    let default_directive = match verbosity {
        0 => "proxy_core=info,proxy_config=info,proxy_cli=info",
        1 => "proxy_core=debug,proxy_config=debug,proxy_cli=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// The proxy relies on `EPIPE`/`ECONNRESET` surfacing as ordinary write
/// errors on a half-closed socket rather than killing the process, so
/// `SIGPIPE` is ignored process-wide before the dispatcher opens any
/// sockets.
fn mask_sigpipe() {
    // SAFETY: `signal` with `SIG_IGN` only installs a disposition for
    // `SIGPIPE`; it touches no shared state and cannot race with anything
    // else at this point in startup.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}
