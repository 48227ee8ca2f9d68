//! A configuration source made of `-c key=value` command-line options.

use config::{ConfigError, Source, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Alias for the Result type from config.
type Result<T> = std::result::Result<T, ConfigError>;

/// A set of toml lines given on the command line, each of which
/// overrides a single configuration value.
///
/// Each line is a toml `key = value` assignment.  Values that toml
/// would reject as unquoted (like `notice`, or `/var/log/obfs.log`)
/// are quoted for the user, so that `-c logging.min_severity=debug`
/// does what it looks like it should.
#[derive(Debug, Clone, Default)]
pub struct CmdLine {
    /// The lines, in the order given.
    lines: Vec<String>,
}

impl CmdLine {
    /// Make a new command line with no options on it.
    pub fn new() -> Self {
        CmdLine::default()
    }

    /// Add one `key=value` line.
    pub fn push_toml_line(&mut self, line: String) {
        self.lines.push(line);
    }

    /// Return true if no lines have been added.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Join our lines into a single toml document.
    fn build_toml(&self) -> String {
        self.lines
            .iter()
            .map(|line| quote_bare_value(line).unwrap_or_else(|| line.clone()))
            .fold(String::new(), |mut doc, line| {
                doc.push_str(&line);
                doc.push('\n');
                doc
            })
    }

    /// Rewrite a toml error message so that it names the offending
    /// option, rather than a line of a document the user never saw.
    fn describe_toml_error(&self, msg: &str, line_col: Option<(usize, usize)>) -> String {
        /// Matches the position suffix that the toml crate appends.
        static POSITION: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r" at line [0-9]+ column [0-9]+$").expect("Can't compile regex")
        });
        let msg = POSITION.replace(msg, "");
        match line_col.and_then(|(line, _)| self.lines.get(line)) {
            Some(opt) => format!("{} in option {:?}", msg, opt),
            None => format!("{} on command line", msg),
        }
    }
}

impl Source for CmdLine {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<HashMap<String, Value>> {
        let doc = self.build_toml();
        let parsed: toml::Value = toml::from_str(&doc).map_err(|e| {
            ConfigError::Message(self.describe_toml_error(&e.to_string(), e.line_col()))
        })?;
        parsed
            .try_into()
            .map_err(|e| ConfigError::Foreign(Box::new(e)))
    }
}

/// If `s` is `key=value` where `value` isn't already quoted or
/// bracketed, return the same assignment with `value` as a toml
/// literal string.  Otherwise return None.
///
/// Quoting a number or a boolean is harmless: `config` converts
/// strings back to whatever type the deserializer wants.
fn quote_bare_value(s: &str) -> Option<String> {
    /// Matches a dotted key, an equals sign, and an unquoted value.
    static BARE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r#"(?x:
               ^
                [ \t]*
                # first capture group: the dotted key
                ((?:[a-zA-Z0-9_\-]+\.)*
                 [a-zA-Z0-9_\-]+)
                [ \t]*=[ \t]*
                # second group: a value that toml wouldn't take as-is
                ([^"'\[\{\ \t][^"'\t]*?)
                [ \t]*
                $)"#,
        )
        .expect("Built-in regex compilation failed")
    });

    BARE.captures(s).map(|c| format!("{}='{}'", &c[1], &c[2]))
}
