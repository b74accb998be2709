//! Server configuration loading.
//!
//! Reads `mcp-servers.json` (or a YAML equivalent) and resolves environment
//! variables. The file lists the servers to connect plus client and logging
//! settings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::mcp_client::{ClientSettings, McpError, ServerConfig};

/// Env var naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "MCP_BRIDGE_CONFIG";

/// File name looked up in the working and config directories.
pub const DEFAULT_CONFIG_FILE: &str = "mcp-servers.json";

/// Directory under the platform config dir.
const APP_CONFIG_DIR: &str = "mcp-bridge";

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct McpServersConfig {
    /// Server name → transport config.
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
    #[serde(default)]
    pub settings: ClientSettings,
    /// Optional allowlist of server names to register.
    ///
    /// When set and non-empty, every other server is skipped.
    #[serde(default)]
    pub enabled_servers: Option<Vec<String>>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl McpServersConfig {
    /// Servers that pass the `enabled_servers` allowlist, in name order.
    pub fn active_servers(&self) -> Vec<(&str, &ServerConfig)> {
        let allow = self.enabled_servers.as_ref().filter(|list| !list.is_empty());
        self.servers
            .iter()
            .filter(|(name, _)| allow.map_or(true, |list| list.iter().any(|n| n == *name)))
            .map(|(name, config)| (name.as_str(), config))
            .collect()
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings. `RUST_LOG`, when set, overrides `level`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive string.
    pub level: String,
    pub format: LogFormat,
    /// Log file path. Logs go to stderr when absent.
    pub file: Option<PathBuf>,
    /// Rotated log files to keep.
    pub keep: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "mcp_bridge=info,warn".to_string(),
            format: LogFormat::Text,
            file: None,
            keep: 3,
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Order: `explicit`, then `MCP_BRIDGE_CONFIG`, then `./mcp-servers.json`,
/// then `<config_dir>/mcp-bridge/mcp-servers.json`.
pub fn find_config_path(explicit: Option<&Path>) -> Result<PathBuf, McpError> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    resolve_config_path(
        explicit,
        std::env::var(CONFIG_ENV_VAR).ok(),
        &cwd,
        dirs::config_dir(),
    )
}

fn resolve_config_path(
    explicit: Option<&Path>,
    from_env: Option<String>,
    cwd: &Path,
    config_dir: Option<PathBuf>,
) -> Result<PathBuf, McpError> {
    // 1. Explicit path and env var are taken as given; loading reports if missing.
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = from_env.filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(expand_tilde(&path)));
    }

    // 2. Conventional locations
    let mut candidates = vec![cwd.join(DEFAULT_CONFIG_FILE)];
    if let Some(dir) = config_dir {
        candidates.push(dir.join(APP_CONFIG_DIR).join(DEFAULT_CONFIG_FILE));
    }
    if let Some(found) = candidates.iter().find(|c| c.exists()) {
        return Ok(found.clone());
    }

    Err(McpError::ConfigError {
        reason: format!(
            "could not find {DEFAULT_CONFIG_FILE} (searched {}); set {CONFIG_ENV_VAR} or pass a path",
            candidates
                .iter()
                .map(|c| c.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    })
}

/// Load and parse a config file.
///
/// Performs environment-variable interpolation on the raw text for
/// `${VAR_NAME}` and `${VAR_NAME:-default}` before parsing. `.yaml`/`.yml`
/// files parse as YAML, `.json` as JSON; anything else tries JSON first.
pub fn load_config(path: &Path) -> Result<McpServersConfig, McpError> {
    let raw = std::fs::read_to_string(path).map_err(|e| McpError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let config = parse_config(&raw, extension.as_deref())?;
    tracing::debug!(
        path = %path.display(),
        servers = config.servers.len(),
        "loaded MCP server config"
    );
    Ok(config)
}

/// Parse config text. `extension` selects the format.
pub fn parse_config(raw: &str, extension: Option<&str>) -> Result<McpServersConfig, McpError> {
    let interpolated = interpolate_env_vars(raw);

    let mut config: McpServersConfig = match extension {
        Some("json") => serde_json::from_str(&interpolated).map_err(|e| parse_error("JSON", e))?,
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&interpolated).map_err(|e| parse_error("YAML", e))?
        }
        _ => match serde_json::from_str(&interpolated) {
            Ok(config) => config,
            Err(_) => serde_yaml::from_str(&interpolated).map_err(|e| parse_error("config", e))?,
        },
    };

    expand_paths(&mut config);
    Ok(config)
}

fn parse_error(kind: &str, e: impl std::fmt::Display) -> McpError {
    McpError::ConfigError {
        reason: format!("failed to parse {kind}: {e}"),
    }
}

/// Expand `~` in stdio commands, working directories and the log file.
fn expand_paths(config: &mut McpServersConfig) {
    for server in config.servers.values_mut() {
        if let ServerConfig::Stdio(stdio) = server {
            stdio.command = expand_tilde(&stdio.command);
            if let Some(cwd) = &stdio.cwd {
                stdio.cwd = Some(expand_tilde(cwd));
            }
        }
    }
    if let Some(file) = &config.logging.file {
        config.logging.file = Some(PathBuf::from(expand_tilde(&file.to_string_lossy())));
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve `VAR` or `VAR:-default`. Unset without a default is empty.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => std::env::var(var_name)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') {
            if let Some(home) = dirs::home_dir() {
                return format!("{}{rest}", home.display());
            }
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
