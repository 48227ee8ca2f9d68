//! An obfuscating proxy.
//!
//! obfsproxy listens for connections, pairs each one with an outbound
//! connection, and passes the bytes through a pluggable protocol so
//! that they don't look like what they carry.  Listeners are described
//! by protocol lines on the command line:
//!
//! ```text
//! obfsproxy obfs2 --dest=198.51.100.7:4000 client 127.0.0.1:5000
//! obfsproxy obfs2 --shared-secret=xyzzy socks 127.0.0.1:1080
//! obfsproxy dummy server 0.0.0.0:4000 127.0.0.1:9001
//! ```
//!
//! or, when Tor launches us as a pluggable transport, by the single
//! word `managed` and a set of environment variables.

#![warn(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]

mod exit;
mod managed;

use std::io::Write;
use std::sync::Arc;

use obfs_config::CfgPath;
use obfs_relay::{MgrConfig, Relay};

use anyhow::{Context, Result};
use argh::FromArgs;
use serde::Deserialize;
use tracing::{info, warn};

#[derive(FromArgs, Debug, Clone)]
/// Relay connections through an obfuscating protocol.
///
/// Each protocol line is a protocol name (dummy or obfs2) followed by
/// its options; the word "managed" instead reads a configuration from
/// Tor's pluggable-transport environment.
struct Args {
    /// override the default location(s) for the configuration file
    #[argh(option, short = 'f')]
    rc: Vec<String>,
    /// override a configuration option (uses toml syntax)
    #[argh(option, short = 'c')]
    cfg: Vec<String>,
    /// write logs to this file instead of standard error
    #[argh(option)]
    log_file: Option<String>,
    /// lowest severity to log: error, warn, notice, info, or debug
    #[argh(option)]
    log_min_severity: Option<String>,
    /// don't log anything
    #[argh(switch)]
    no_log: bool,
    /// put real addresses in the logs
    #[argh(switch)]
    no_safe_logging: bool,
    /// protocol lines, or "managed"
    #[argh(positional, greedy)]
    transports: Vec<String>,
}

impl Args {
    /// Return our `-c` options, followed by the ones implied by the
    /// logging flags.
    fn overrides(&self) -> Vec<String> {
        let mut opts = self.cfg.clone();
        if let Some(file) = &self.log_file {
            opts.push(format!("logging.file={:?}", file));
        }
        if let Some(sev) = &self.log_min_severity {
            opts.push(format!("logging.min_severity={:?}", sev));
        }
        if self.no_safe_logging {
            opts.push("logging.safe_logging=false".to_string());
        }
        opts
    }
}

/// Default options to use for our configuration.
const OBFSPROXY_DEFAULTS: &str = include_str!("./obfsproxy_defaults.toml");

/// Structure to hold our configuration options, whether from a
/// configuration file or the command line.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
struct ProxyConfig {
    /// How and where to log.
    logging: LoggingConfig,
    /// Limits on SOCKS clients.
    socks: SocksConfig,
}

/// Configuration for logging.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
struct LoggingConfig {
    /// Lowest severity that gets logged.
    min_severity: Severity,
    /// Whether to scrub addresses from log messages.
    safe_logging: bool,
    /// A file to log to, instead of stderr.
    file: Option<CfgPath>,
}

/// Configuration for SOCKS listeners.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
struct SocksConfig {
    /// How many bytes of a SOCKS4 request to accept before its
    /// terminating NUL.
    max_socks4_request_len: usize,
}

/// A log severity, as named in our configuration.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Severity {
    /// Only errors.
    Error,
    /// Warnings and errors.
    Warn,
    /// Normal operational messages.  Same as `info`.
    Notice,
    /// Normal operational messages.
    Info,
    /// Everything.
    Debug,
}

impl Severity {
    /// Return the tracing level that corresponds to this severity.
    fn level(self) -> tracing::Level {
        match self {
            Severity::Error => tracing::Level::ERROR,
            Severity::Warn => tracing::Level::WARN,
            Severity::Notice | Severity::Info => tracing::Level::INFO,
            Severity::Debug => tracing::Level::DEBUG,
        }
    }
}

impl ProxyConfig {
    /// Return the settings for our connection manager.
    fn mgr_config(&self) -> MgrConfig {
        MgrConfig::default()
            .safe_logging(self.logging.safe_logging)
            .max_socks4_len(self.socks.max_socks4_request_len)
    }
}

/// A log file shared by every thread that logs.
struct LogFile(Arc<std::fs::File>);

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        (&*self.0).write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        (&*self.0).flush()
    }
}

/// Install a tracing subscriber as `cfg` says.
fn setup_logging(cfg: &LoggingConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_max_level(cfg.min_severity.level());
    match &cfg.file {
        Some(path) => {
            let path = path
                .path()
                .with_context(|| format!("Can't expand log file name {}", path))?;
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Can't open log file {:?}", path))?;
            let file = Arc::new(file);
            builder
                .with_ansi(false)
                .with_writer(move || LogFile(Arc::clone(&file)))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

/// Build our configuration from the defaults, the config files, and
/// the command line.
fn load_config(args: &Args) -> Result<ProxyConfig> {
    let dflt_config = obfs_config::default_config_file();

    let mut cfg = config::Config::new();
    cfg.merge(config::File::from_str(
        OBFSPROXY_DEFAULTS,
        config::FileFormat::Toml,
    ))?;
    obfs_config::load(&mut cfg, dflt_config, &args.rc, &args.overrides())?;

    cfg.try_into().context("Invalid configuration")
}

/// Open every listener we were asked for, then relay until shut down.
async fn run(relay: Relay, args: &Args, safe_logging: bool) -> Result<()> {
    let mut relay = relay;
    if args.transports.len() == 1 && args.transports[0] == "managed" {
        let mut stdout = std::io::stdout();
        managed::launch(&mut relay, managed::from_env, &mut stdout, safe_logging).await?;
    } else {
        let configs = obfs_proto::configs_from_args(&args.transports[..])
            .context("Couldn't parse protocol lines")?;
        for cfg in configs {
            let name = cfg.protocol().name();
            relay
                .open_listeners(cfg)
                .await
                .with_context(|| format!("Couldn't open listeners for {}", name))?;
        }
    }

    let handle = relay.shutdown_handle();
    tokio::spawn(async move {
        if let Err(e) = exit::watch_signals(handle).await {
            warn!("Can't watch for signals: {}", e);
        }
    });

    relay.run().await?;
    Ok(())
}

/// Parse our arguments and configuration, then run the relay.
fn main() -> Result<()> {
    let args: Args = argh::from_env();
    let config = load_config(&args)?;

    if !args.no_log {
        setup_logging(&config.logging)?;
    }
    info!("obfsproxy starting up");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Can't start runtime")?;
    runtime.block_on(run(
        Relay::new(config.mgr_config()),
        &args,
        config.logging.safe_logging,
    ))?;

    info!("obfsproxy exiting cleanly");
    Ok(())
}
