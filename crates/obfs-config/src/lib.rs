//! Configuration loading for obfsproxy.
//!
//! obfsproxy's own settings (logging, SOCKS limits) live in toml files
//! and are read with the `serde` and `config` crates.  This crate adds
//! the pieces those crates don't have: a command-line source for
//! single `key=value` overrides, a path type with home-directory and
//! variable expansion, and the rules for where to look for files.
//!
//! The transport lines themselves (`obfs2 server ...`) are not part of
//! this configuration; see `obfs_proto`.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]
#![deny(clippy::exhaustive_enums)]
#![deny(clippy::exhaustive_structs)]

mod cmdline;
mod path;

pub use cmdline::CmdLine;
pub use path::{project_dirs, CfgPath, PathError, PT_STATE_VAR};

use std::path::{Path, PathBuf};
use tracing::debug;

/// Merge configuration files and command-line overrides into `cfg`.
///
/// The files must be toml.  Each element of `opts` is a single
/// `key=value` line, as accepted by [`CmdLine`]; these are merged last,
/// so they win.
///
/// If `files` is empty and `default_path` is given, the default file is
/// read if it exists.  Files named explicitly must exist.
pub fn load<'a, P1, C1, P2, C2>(
    cfg: &mut config::Config,
    default_path: Option<P1>,
    files: C1,
    opts: C2,
) -> Result<(), config::ConfigError>
where
    P1: AsRef<Path> + 'a,
    C1: IntoIterator<Item = &'a P2>,
    P2: AsRef<Path> + 'a,
    C2: IntoIterator,
    C2::Item: AsRef<str>,
{
    let mut search: Vec<&Path> = Vec::new();
    for f in files {
        search.push(f.as_ref());
    }
    let required = !search.is_empty();
    if search.is_empty() {
        if let Some(p) = &default_path {
            debug!("Looking for a default configuration in {:?}", p.as_ref());
            search.push(p.as_ref());
        }
    }

    for p in search {
        let f: config::File<_> = p.into();
        cfg.merge(f.format(config::FileFormat::Toml).required(required))?;
    }

    let mut cmdline = CmdLine::new();
    for opt in opts {
        cmdline.push_toml_line(opt.as_ref().to_string());
    }
    if !cmdline.is_empty() {
        cfg.merge(cmdline)?;
    }

    Ok(())
}

/// Return the name of the default configuration file for this user.
pub fn default_config_file() -> Option<PathBuf> {
    project_dirs()
        .ok()
        .map(|pd| pd.config_dir().join("obfsproxy.toml"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_default_is_fine() {
        let mut cfg = config::Config::new();
        cfg.merge(config::File::from_str(
            "[logging]\nmin_severity = \"notice\"\n",
            config::FileFormat::Toml,
        ))
        .unwrap();
        let nofiles: Vec<PathBuf> = Vec::new();
        load(
            &mut cfg,
            Some("/this/file/should/not/exist.toml"),
            &nofiles,
            &["logging.min_severity=debug", "logging.safe_logging=false"],
        )
        .unwrap();
        assert_eq!(cfg.get_str("logging.min_severity").unwrap(), "debug");
        assert!(!cfg.get_bool("logging.safe_logging").unwrap());
    }

    #[test]
    fn missing_named_file_is_not() {
        let mut cfg = config::Config::new();
        let files = vec![PathBuf::from("/this/file/should/not/exist.toml")];
        let noopts: Vec<String> = Vec::new();
        let r = load(&mut cfg, None::<&str>, &files, &noopts);
        assert!(r.is_err());
    }

    #[test]
    fn default_file_name() {
        if let Some(p) = default_config_file() {
            assert!(p.ends_with("obfsproxy.toml"));
        }
    }
}
