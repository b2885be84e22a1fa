//! Typed instance config file.
//!
//! The managed server reads a line-oriented `key value` file. [`InstanceConf`]
//! is the single schema used both to write that file at creation time and
//! to read it back during reconciliation.

use crate::error::{Error, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

const PORT: &str = "port";
const DIR: &str = "dir";
const REQUIREPASS: &str = "requirepass";

/// Contents of an instance's `server.conf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceConf {
    /// `port <n>`
    pub port: u16,
    /// `dir <data_dir>`
    pub dir: Option<PathBuf>,
    /// `requirepass <credential>`
    pub requirepass: Option<String>,
    /// Directives this crate does not manage, kept in file order
    pub extra: Vec<(String, String)>,
}

impl InstanceConf {
    /// Minimal config for a new instance.
    pub fn new(port: u16, dir: impl Into<PathBuf>, requirepass: Option<String>) -> Self {
        Self {
            port,
            dir: Some(dir.into()),
            requirepass: requirepass.filter(|p| !p.is_empty()),
            extra: Vec::new(),
        }
    }

    /// Render the file contents.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} {}", PORT, self.port);
        if let Some(dir) = &self.dir {
            let _ = writeln!(out, "{} {}", DIR, quote(&dir.to_string_lossy()));
        }
        if let Some(pass) = &self.requirepass {
            let _ = writeln!(out, "{} {}", REQUIREPASS, quote(pass));
        }
        for (key, value) in &self.extra {
            let _ = writeln!(out, "{} {}", key, value);
        }
        out
    }

    /// Parse file contents.
    ///
    /// Blank lines and `#` comments are skipped, keys are case-insensitive and
    /// a repeated directive overrides the earlier one.
    ///
    /// # Errors
    ///
    /// `Error::ConfigParse` when the `port` directive is missing or not a
    /// valid port number.
    pub fn parse(content: &str) -> Result<Self> {
        let mut port = None;
        let mut dir = None;
        let mut requirepass = None;
        let mut extra = Vec::new();

        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = match line.split_once(char::is_whitespace) {
                Some((key, value)) => (key, value.trim()),
                None => (line, ""),
            };

            match key.to_ascii_lowercase().as_str() {
                PORT => {
                    let parsed = unquote(value).parse::<u16>().ok().filter(|p| *p != 0);
                    port = Some(parsed.ok_or_else(|| {
                        Error::ConfigParse(format!(
                            "line {}: invalid port '{}'",
                            lineno + 1,
                            value
                        ))
                    })?);
                }
                DIR => dir = Some(PathBuf::from(unquote(value))),
                REQUIREPASS => {
                    let pass = unquote(value);
                    requirepass = (!pass.is_empty()).then(|| pass.to_string());
                }
                _ => extra.push((key.to_string(), value.to_string())),
            }
        }

        let port = port.ok_or_else(|| Error::ConfigParse("missing 'port' directive".to_string()))?;

        Ok(Self {
            port,
            dir,
            requirepass,
            extra,
        })
    }

    /// Read and parse a config file.
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigParse(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Render and write a config file.
    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.render())
    }
}

fn quote(value: &str) -> String {
    if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '"') {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

fn unquote(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1]
            .replace("\\\"", "\"")
            .replace("\\\\", "\\")
    } else {
        trimmed.to_string()
    }
}
