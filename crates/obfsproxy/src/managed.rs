//! Run as a managed proxy, configured by Tor through the environment.
//!
//! When Tor launches us as a pluggable transport, it tells us what to
//! do in `TOR_PT_*` environment variables, and expects us to answer on
//! standard output: first with the managed-proxy protocol version we
//! picked, then with one `CMETHOD` or `SMETHOD` line for each
//! transport we launched (or an error line for each we couldn't), and
//! finally with `CMETHODS DONE` or `SMETHODS DONE`.

use obfs_relay::Relay;

use anyhow::{bail, Context, Result};
use std::io::Write;
use tracing::{debug, info, warn};

/// Where Tor wants us to keep state.
const STATE_LOCATION: &str = "TOR_PT_STATE_LOCATION";
/// Which managed-proxy protocol versions Tor speaks.
const TRANSPORT_VER: &str = "TOR_PT_MANAGED_TRANSPORT_VER";
/// Transports to launch in client mode.
const CLIENT_TRANSPORTS: &str = "TOR_PT_CLIENT_TRANSPORTS";
/// Transports to launch in server mode.
const SERVER_TRANSPORTS: &str = "TOR_PT_SERVER_TRANSPORTS";
/// Where server transports should send their traffic.
const ORPORT: &str = "TOR_PT_ORPORT";
/// Where each server transport should listen.
const BINDADDR: &str = "TOR_PT_SERVER_BINDADDR";
/// Tor's extended ORPort.  We don't use it.
const EXTENDED_PORT: &str = "TOR_PT_EXTENDED_SERVER_PORT";

/// Managed-proxy protocol versions we speak.
const SUPPORTED_VERSIONS: &[&str] = &["1"];

/// Client transports find their own port on localhost.
const CLIENT_BINDADDR: &str = "127.0.0.1:0";

/// A problem with the environment Tor gave us.
///
/// The messages are the ones we report to Tor in `ENV-ERROR` lines.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum EnvError {
    /// No state location.
    #[error("failed on TOR_PT_STATE_LOCATION")]
    StateLocation,
    /// No list of protocol versions.
    #[error("failed on TOR_PT_MANAGED_TRANSPORT_VER")]
    TransportVer,
    /// A server with no ORPort.
    #[error("failed on TOR_PT_ORPORT")]
    OrPort,
    /// A server with missing or mismatched bind addresses.
    #[error("failed on TOR_PT_SERVER_BINDADDR")]
    BindAddr,
    /// A server with no transports.
    #[error("failed on TOR_PT_SERVER_TRANSPORTS")]
    ServerTransports,
}

/// Whether we're a client or a server, and what servers need to know.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Role {
    /// We run SOCKS listeners for Tor to connect through.
    Client,
    /// We accept obfuscated connections and relay them to Tor.
    Server {
        /// Tor's ORPort.
        orport: String,
        /// Tor's extended ORPort, possibly empty.
        extended_port: String,
    },
}

/// Everything Tor told us in the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ManagedEnv {
    /// Where we may keep state.
    state_location: String,
    /// Managed-proxy protocol versions Tor speaks, in its order.
    versions: Vec<String>,
    /// Client or server.
    role: Role,
    /// Each transport to launch, with the address it listens on.
    transports: Vec<(String, String)>,
}

/// Split a comma-separated list, dropping blanks.
fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Match each transport name with its `name-addr` bind address.
///
/// The lists must be the same length, in the same order, and every
/// address must include a port.
fn pair_bindaddrs(names: &[String], bindaddrs: &[String]) -> Option<Vec<(String, String)>> {
    if names.len() != bindaddrs.len() {
        return None;
    }
    names
        .iter()
        .zip(bindaddrs)
        .map(|(name, entry)| {
            let addr = entry.strip_prefix(name.as_str())?.strip_prefix('-')?;
            obfs_proto::parse_addr_port(addr, None).ok()?;
            Some((name.clone(), addr.to_string()))
        })
        .collect()
}

impl ManagedEnv {
    /// Read our environment using `get`, which returns the value of a
    /// variable if it's set.
    fn from_lookup<F>(get: F) -> std::result::Result<Self, EnvError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let state_location = get(STATE_LOCATION).ok_or(EnvError::StateLocation)?;
        let versions = split_list(&get(TRANSPORT_VER).ok_or(EnvError::TransportVer)?);

        if let Some(names) = get(CLIENT_TRANSPORTS) {
            let mut names = split_list(&names);
            if names.iter().any(|n| n == "*") {
                names = obfs_proto::protocols()
                    .iter()
                    .map(|p| p.name().to_string())
                    .collect();
            }
            return Ok(ManagedEnv {
                state_location,
                versions,
                role: Role::Client,
                transports: names
                    .into_iter()
                    .map(|n| (n, CLIENT_BINDADDR.to_string()))
                    .collect(),
            });
        }

        let extended_port = get(EXTENDED_PORT).unwrap_or_default();
        let orport = get(ORPORT).ok_or(EnvError::OrPort)?;
        let bindaddrs = get(BINDADDR).ok_or(EnvError::BindAddr)?;
        let names = split_list(&get(SERVER_TRANSPORTS).ok_or(EnvError::ServerTransports)?);
        let transports =
            pair_bindaddrs(&names, &split_list(&bindaddrs)).ok_or(EnvError::BindAddr)?;

        Ok(ManagedEnv {
            state_location,
            versions,
            role: Role::Server {
                orport,
                extended_port,
            },
            transports,
        })
    }

    /// Return the first protocol version Tor offered that we speak.
    fn negotiate_version(&self) -> Option<&str> {
        self.versions
            .iter()
            .map(String::as_str)
            .find(|v| SUPPORTED_VERSIONS.contains(v))
    }

    /// Return true if we're a server.
    fn is_server(&self) -> bool {
        matches!(self.role, Role::Server { .. })
    }
}

/// Writes managed-proxy protocol lines for Tor.
struct Reporter<'a, W> {
    /// Where Tor reads them.
    out: &'a mut W,
    /// If true, don't copy lines into the log; they contain addresses.
    safe_logging: bool,
}

impl<'a, W: Write> Reporter<'a, W> {
    /// Send a single line, and make sure Tor sees it at once.
    fn line(&mut self, line: String) -> Result<()> {
        writeln!(self.out, "{}", line).context("Can't write to Tor")?;
        self.out.flush().context("Can't write to Tor")?;
        if !self.safe_logging {
            debug!("Told Tor: {}", line);
        }
        Ok(())
    }
}

/// Configure ourselves from the environment that `get` reads, open
/// listeners on `relay`, and report to Tor on `out`.
///
/// Return the number of transports launched.  It's an error if the
/// environment is bad, if we share no protocol version with Tor, or
/// if no transport could be launched.
pub(crate) async fn launch<F, W>(
    relay: &mut Relay,
    get: F,
    out: &mut W,
    safe_logging: bool,
) -> Result<usize>
where
    F: Fn(&str) -> Option<String>,
    W: Write,
{
    let mut tor = Reporter { out, safe_logging };

    let env = match ManagedEnv::from_lookup(get) {
        Ok(env) => env,
        Err(e) => {
            tor.line(format!("ENV-ERROR {}", e))?;
            return Err(e).context("Bad managed-proxy environment");
        }
    };
    debug!("Managed-proxy state directory is {}", env.state_location);

    match env.negotiate_version() {
        Some(v) => tor.line(format!("VERSION {}", v))?,
        None => {
            tor.line("VERSION-ERROR no-version".to_string())?;
            bail!("Tor offered no managed-proxy version we speak");
        }
    }

    let (method, orport) = match &env.role {
        Role::Client => ("CMETHOD", None),
        Role::Server {
            orport,
            extended_port,
        } => {
            if !extended_port.is_empty() {
                info!("Not using the extended ORPort; relaying to the ORPort instead");
            }
            ("SMETHOD", Some(orport.as_str()))
        }
    };

    let mut configs = Vec::new();
    for (name, bindaddr) in &env.transports {
        match obfs_proto::config_create_managed(name, env.is_server(), bindaddr, orport) {
            Ok(cfg) => configs.push((name, cfg)),
            Err(e) => {
                warn!("Can't set up {}: {}", name, e);
                tor.line(format!("{}-ERROR {} could not setup protocol", method, name))?;
            }
        }
    }

    let mut launched = 0;
    for (name, cfg) in configs {
        let addr = match relay.open_listeners(cfg).await {
            Ok(addrs) => addrs.first().copied(),
            Err(e) => {
                warn!("Can't launch {}: {}", name, e);
                None
            }
        };
        match (addr, env.is_server()) {
            (Some(addr), true) => tor.line(format!("SMETHOD {} {}", name, addr))?,
            (Some(addr), false) => tor.line(format!("CMETHOD {} socks5 {}", name, addr))?,
            (None, _) => {
                tor.line(format!("{}-ERROR {} could not launch listener", method, name))?;
                continue;
            }
        }
        launched += 1;
    }

    tor.line(format!("{}S DONE", method))?;

    if launched == 0 {
        bail!("No transports launched");
    }
    Ok(launched)
}

/// Read a variable from the real environment.
pub(crate) fn from_env(var: &str) -> Option<String> {
    std::env::var(var).ok()
}
