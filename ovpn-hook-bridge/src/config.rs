//! Plugin configuration from OpenVPN's `plugin` directive
//!
//! ```text
//! plugin /usr/lib/openvpn/ovpn_hook_bridge.so auth_hook mode=cached path=/etc/openvpn/hooks fuel=5000000
//! ```
//!
//! `argv[0]` is the plugin path, `argv[1]` the module identifier, and any
//! further arguments are `key=value` options.

use crate::error::ConfigError;
use crate::logging;
use std::path::PathBuf;

/// How handlers are obtained from the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceMode {
    /// Import once at initialization, cache every handler
    #[default]
    Cached,
    /// Re-import the module and resolve the handler on every dispatch
    PerCall,
}

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Module identifier: a path, or a name looked up in `search_path`
    pub module: String,

    /// Handler source selection
    pub mode: SourceMode,

    /// Directories searched for `<module>.wasm` / `<module>.wat`
    pub search_path: Vec<PathBuf>,

    /// Fuel limit per handler invocation (unbounded if None)
    pub fuel: Option<u64>,

    /// `EnvFilter` directive for bridge diagnostics
    pub log_filter: String,
}

impl BridgeConfig {
    /// Create a configuration with defaults for the given module
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            mode: SourceMode::default(),
            search_path: vec![PathBuf::from(".")],
            fuel: None,
            log_filter: "debug".to_string(),
        }
    }

    /// Set the handler source mode
    pub fn mode(mut self, mode: SourceMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the fuel limit
    pub fn fuel(mut self, fuel: u64) -> Self {
        self.fuel = Some(fuel);
        self
    }

    /// Replace the module search path
    pub fn search_path(mut self, dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.search_path = dirs.into_iter().map(Into::into).collect();
        self
    }

    /// Parse the plugin's `argv` (including `argv[0]`)
    pub fn from_args<S: AsRef<str>>(argv: &[S]) -> Result<Self, ConfigError> {
        let module = argv
            .get(1)
            .map(|s| s.as_ref().trim())
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingModule)?;

        let mut config = Self::new(module);
        for arg in argv.iter().skip(2) {
            config.apply_option(arg.as_ref())?;
        }
        config.validate()?;
        Ok(config)
    }

    fn apply_option(&mut self, arg: &str) -> Result<(), ConfigError> {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| ConfigError::invalid_option(arg, "expected key=value"))?;

        match key {
            "mode" => {
                self.mode = match value {
                    "cached" => SourceMode::Cached,
                    "per-call" => SourceMode::PerCall,
                    other => {
                        return Err(ConfigError::invalid_option(
                            key,
                            format!("unknown mode '{other}', expected cached or per-call"),
                        ))
                    }
                };
            }
            "path" => {
                self.search_path = value
                    .split(':')
                    .filter(|dir| !dir.is_empty())
                    .map(PathBuf::from)
                    .collect();
            }
            "fuel" => {
                let fuel = value
                    .parse::<u64>()
                    .map_err(|e| ConfigError::invalid_option(key, e.to_string()))?;
                self.fuel = (fuel > 0).then_some(fuel);
            }
            "log" => {
                logging::parse_filter(value)?;
                self.log_filter = value.to_string();
            }
            _ => return Err(ConfigError::invalid_option(key, "unknown option")),
        }
        Ok(())
    }

    /// Check the configuration before any resource is acquired
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.module.trim().is_empty() {
            return Err(ConfigError::MissingModule);
        }
        if self.search_path.is_empty() {
            return Err(ConfigError::invalid_option("path", "no search directories"));
        }
        logging::parse_filter(&self.log_filter)?;
        Ok(())
    }
}
