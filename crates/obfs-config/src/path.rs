//! Paths in configuration files.
//!
//! A configured path may start with `~`, and may use a few variables
//! that name places obfsproxy is allowed to keep things.

use std::path::{Path, PathBuf};

use directories::{BaseDirs, ProjectDirs};
use once_cell::sync::Lazy;
use serde::Deserialize;

/// Environment variable where Tor tells a managed proxy to keep its
/// state.
pub const PT_STATE_VAR: &str = "TOR_PT_STATE_LOCATION";

/// A path in a configuration file, before tilde and variable expansion.
///
/// The supported variables are:
///   * `APP_CACHE`: an obfsproxy-specific cache directory.
///   * `APP_CONFIG`: an obfsproxy-specific configuration directory.
///   * `APP_LOCAL_DATA`: an obfsproxy-specific directory in the user's
///     "local data" space.
///   * `PT_STATE`: the state directory Tor gave us in
///     `TOR_PT_STATE_LOCATION`, when running as a managed proxy.
///   * `USER_HOME`: the user's home directory.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CfgPath(String);

/// An error from expanding a [`CfgPath`].
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum PathError {
    /// The path used a variable we don't know.
    #[error("unrecognized variable")]
    UnknownVar,
    /// The path used `PT_STATE`, but Tor didn't give us one.
    #[error("no {} in the environment", PT_STATE_VAR)]
    NoPtState,
    /// We couldn't find the project directories.
    #[error("can't construct project directories")]
    NoProjectDirs,
    /// We couldn't find the user's base directories.
    #[error("can't construct base directories")]
    NoBaseDirs,
    /// A directory's name wasn't UTF-8.
    #[error("can't convert to UTF-8")]
    BadUtf8,
}

impl CfgPath {
    /// Wrap an unexpanded path.
    pub fn new(s: String) -> Self {
        CfgPath(s)
    }

    /// Return the path on disk that this names.
    pub fn path(&self) -> Result<PathBuf, shellexpand::LookupError<PathError>> {
        let expanded = shellexpand::full_with_context(&self.0, home_dir, lookup_var)?;
        Ok(PathBuf::from(expanded.into_owned()))
    }
}

impl std::fmt::Display for CfgPath {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(fmt)
    }
}

/// Shellexpand helper: find the user's home directory.
fn home_dir() -> Option<&'static Path> {
    base_dirs().ok().map(BaseDirs::home_dir)
}

/// Shellexpand helper: look up one of our variables.
///
/// An unset variable is an error, never an empty string.
fn lookup_var(var: &str) -> Result<Option<&'static str>, PathError> {
    /// The state location Tor gave us, read once.
    static PT_STATE: Lazy<Option<String>> = Lazy::new(|| std::env::var(PT_STATE_VAR).ok());

    let path = match var {
        "APP_CACHE" => project_dirs()?.cache_dir(),
        "APP_CONFIG" => project_dirs()?.config_dir(),
        "APP_LOCAL_DATA" => project_dirs()?.data_local_dir(),
        "USER_HOME" => base_dirs()?.home_dir(),
        "PT_STATE" => {
            return PT_STATE
                .as_deref()
                .map(Some)
                .ok_or(PathError::NoPtState)
        }
        _ => return Err(PathError::UnknownVar),
    };
    path.to_str().map(Some).ok_or(PathError::BadUtf8)
}

/// Return the ProjectDirs for obfsproxy.
pub fn project_dirs() -> Result<&'static ProjectDirs, PathError> {
    /// Computed on first use.
    static PROJECT_DIRS: Lazy<Option<ProjectDirs>> =
        Lazy::new(|| ProjectDirs::from("org", "torproject", "obfsproxy"));

    PROJECT_DIRS.as_ref().ok_or(PathError::NoProjectDirs)
}

/// Return the BaseDirs for the current user.
fn base_dirs() -> Result<&'static BaseDirs, PathError> {
    /// Computed on first use.
    static BASE_DIRS: Lazy<Option<BaseDirs>> = Lazy::new(BaseDirs::new);

    BASE_DIRS.as_ref().ok_or(PathError::NoBaseDirs)
}
