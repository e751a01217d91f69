use clap::{ArgAction, Parser};
use radmux_server::handlers::{FileAuthHandler, LogAcctHandler, NullDhcpHandler, NullProxy};
use radmux_server::{Config, DetailWriter, Handlers, Server};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// radmux - multi-protocol RADIUS/DHCPv4 dispatch daemon
#[derive(Parser, Debug)]
#[command(name = "radmuxd", about, long_about = None, disable_version_flag = true)]
struct Cli {
    /// Log authentication detail
    #[arg(short = 'A')]
    auth_detail: bool,

    /// Accounting detail directory
    #[arg(short = 'a', value_name = "DIR")]
    acct_dir: Option<String>,

    /// Cache user entries in memory at startup
    #[arg(short = 'c')]
    cache_users: bool,

    /// Configuration directory
    #[arg(short = 'd', value_name = "DIR")]
    config_dir: Option<String>,

    /// Run as a foreground process, not a daemon
    #[arg(short = 'f')]
    foreground: bool,

    /// Listen only on the given IP address
    #[arg(short = 'i', value_name = "ADDR")]
    bind_address: Option<String>,

    /// Log directory; special values are "stdout" and "syslog"
    #[arg(short = 'l', value_name = "DIR")]
    log_dir: Option<String>,

    /// Do not do reverse DNS lookups
    #[arg(short = 'n')]
    no_dns: bool,

    /// Bind the authentication socket to this port
    #[arg(short = 'p', value_name = "PORT")]
    port: Option<u16>,

    /// Do not spawn worker tasks; handle requests inline
    #[arg(short = 's')]
    single: bool,

    /// Log stripped user names
    #[arg(short = 'S')]
    log_stripped: bool,

    /// Print server version information and exit
    #[arg(short = 'v')]
    version: bool,

    /// Turn on partial debugging; stack for more
    #[arg(short = 'x', action = ArgAction::Count)]
    debug: u8,

    /// Turn on full debugging; shorthand for -sfxxyz -l stdout
    #[arg(short = 'X')]
    full_debug: bool,

    /// Log authentication failures
    #[arg(short = 'y')]
    log_auth: bool,

    /// Log authentication passwords
    #[arg(short = 'z')]
    log_auth_pass: bool,
}

fn init_logging(cli: &Cli, config: &Config) {
    let level = match cli.debug {
        0 => config.log_level.as_deref().unwrap_or("info").to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    match cli.log_dir.as_deref() {
        None | Some("stdout") => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
        // The system logger picks up stderr when running under a
        // service manager.
        Some("syslog") => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
        Some(dir) => {
            let path = Path::new(dir).join("radmux.log");
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(
                            tracing_subscriber::fmt::layer()
                                .with_ansi(false)
                                .with_writer(Mutex::new(file)),
                        )
                        .init();
                }
                Err(e) => {
                    eprintln!("radmuxd: cannot open {}: {}", path.display(), e);
                    process::exit(1);
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let mut cli = Cli::parse();

    if cli.version {
        println!("radmuxd {}", env!("CARGO_PKG_VERSION"));
        process::exit(0);
    }

    if cli.full_debug {
        cli.single = true;
        cli.foreground = true;
        cli.debug = cli.debug.max(2);
        cli.log_auth = true;
        cli.log_auth_pass = true;
        cli.log_dir = Some("stdout".to_string());
    }

    let config_dir = cli.config_dir.clone().unwrap_or_else(|| "/etc/radmux".to_string());
    let config_path = PathBuf::from(&config_dir).join("radmux.json");

    let mut config = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "radmuxd: errors reading config file {}: {}",
                config_path.display(),
                e
            );
            process::exit(1);
        }
    };

    if let Some(addr) = cli.bind_address.clone() {
        config.listen_address = addr;
    }
    if let Some(port) = cli.port {
        config.auth_port = port;
    }
    if cli.single {
        config.spawn_workers = false;
    }
    if let Some(dir) = cli.acct_dir.clone() {
        config.detail_dir = Some(dir);
    }
    if cli.log_auth {
        config.log_auth = true;
    }
    if cli.log_auth_pass {
        config.log_auth_pass = true;
    }
    if cli.log_stripped {
        config.log_stripped_names = true;
    }

    init_logging(&cli, &config);

    info!("radmuxd {} starting", env!("CARGO_PKG_VERSION"));
    info!(path = %config_path.display(), "loaded configuration");

    if cli.no_dns {
        debug!("reverse DNS lookups disabled");
    }
    if cli.cache_users {
        debug!("caching user entries in memory");
    }
    if cli.foreground {
        debug!("staying in the foreground");
    }

    if let Some(pid_file) = config.pid_file.clone() {
        if let Err(e) = std::fs::write(&pid_file, format!("{}\n", process::id())) {
            error!(path = %pid_file, error = %e, "could not write pid file");
        }
    }

    let detail = config
        .detail_dir
        .as_ref()
        .map(|dir| Arc::new(DetailWriter::new(dir)));
    let auth_detail = if cli.auth_detail { detail.clone() } else { None };

    let handlers = Handlers {
        auth: Box::new(FileAuthHandler::new(&config, auth_detail)),
        acct: Box::new(LogAcctHandler::new(detail)),
        dhcp: Box::new(NullDhcpHandler),
        proxy: Box::new(NullProxy),
    };

    if config.clients.is_empty() {
        error!("no clients configured; all RADIUS requests will be dropped");
    }

    let mut server = match Server::bind(config, handlers).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to start");
            process::exit(1);
        }
    };
    server.set_config_path(&config_path);

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install signal handler");
            process::exit(1);
        }
    };
    let mut sigquit = match signal(SignalKind::quit()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install signal handler");
            process::exit(1);
        }
    };

    tokio::select! {
        r = server.run() => {
            if let Err(e) = r {
                error!(error = %e, "server error");
                process::exit(1);
            }
        }
        _ = sigterm.recv() => {
            info!("exit.");
            process::exit(0);
        }
        _ = sigquit.recv() => {
            error!("exit on SIGQUIT");
            process::exit(1);
        }
        _ = tokio::signal::ctrl_c() => {
            error!("exit on interrupt");
            process::exit(1);
        }
    }
}
