//! Agent configuration.
//!
//! The core receives this struct fully formed; the binary builds it from
//! environment variables (and one optional positional argument for the dev
//! server URL). Argument parsing beyond that is deliberately out of scope.

use anyhow::{anyhow, Result};
use std::env;
use std::path::PathBuf;

/// Runtime configuration for the restyle agent.
#[derive(Clone, Debug)]
pub struct RestyleConfig {
    /// Dev-server URL prefix; selects the browser tab and anchors the URL
    /// resolver.
    pub dev_server_base: String,
    /// CDP endpoint host.
    pub chrome_host: String,
    /// CDP endpoint port; when unset the default ports are probed in order.
    pub chrome_port: Option<u16>,
    /// Project root anchoring all resolvers.
    pub project_root: PathBuf,
    /// User URL-prefix to local-prefix mappings, consulted before built-ins.
    pub mappings: Vec<(String, PathBuf)>,
    /// Loop-guard entry lifetime in milliseconds.
    pub loop_guard_ttl_ms: u64,
    /// Emit diagnostic lines.
    pub verbose: bool,
}

impl RestyleConfig {
    /// Construct a config with defaults for everything but the dev server.
    #[must_use]
    pub fn new(dev_server_base: impl Into<String>) -> Self {
        Self {
            dev_server_base: dev_server_base.into(),
            chrome_host: "localhost".to_string(),
            chrome_port: None,
            project_root: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            mappings: Vec::new(),
            loop_guard_ttl_ms: 2000,
            verbose: false,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Reads the following:
    /// - `RESTYLE_DEV_SERVER`: dev-server URL prefix (required unless passed
    ///   as the first positional argument)
    /// - `RESTYLE_CHROME_HOST`: CDP host (default: `localhost`)
    /// - `RESTYLE_CHROME_PORT`: CDP port (default: probe the usual ports)
    /// - `RESTYLE_PROJECT_ROOT`: project root (default: current directory)
    /// - `RESTYLE_MAPPINGS`: comma-separated `url_prefix=local_prefix` pairs
    /// - `RESTYLE_LOOP_TTL_MS`: loop-guard TTL (default: 2000)
    /// - `RESTYLE_VERBOSE`: set to `1` for diagnostics
    ///
    /// # Errors
    ///
    /// Fails when no dev-server URL is available from either source.
    pub fn from_env(arg_dev_server: Option<String>) -> Result<Self> {
        let dev_server_base = arg_dev_server
            .or_else(|| env::var("RESTYLE_DEV_SERVER").ok())
            .ok_or_else(|| {
                anyhow!("no dev server URL; pass it as the first argument or set RESTYLE_DEV_SERVER")
            })?;

        let mut config = Self::new(dev_server_base);
        if let Ok(host) = env::var("RESTYLE_CHROME_HOST") {
            config.chrome_host = host;
        }
        config.chrome_port = env::var("RESTYLE_CHROME_PORT")
            .ok()
            .and_then(|val| val.parse::<u16>().ok());
        if let Ok(root) = env::var("RESTYLE_PROJECT_ROOT") {
            config.project_root = PathBuf::from(root);
        }
        if let Ok(raw) = env::var("RESTYLE_MAPPINGS") {
            config.mappings = parse_mappings(&raw);
        }
        config.loop_guard_ttl_ms = env::var("RESTYLE_LOOP_TTL_MS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .unwrap_or(2000)
            .max(1);
        config.verbose = env::var("RESTYLE_VERBOSE").ok().as_deref() == Some("1");
        Ok(config)
    }
}

fn parse_mappings(raw: &str) -> Vec<(String, PathBuf)> {
    raw.split(',')
        .filter_map(|pair| {
            let (prefix, local) = pair.split_once('=')?;
            let prefix = prefix.trim();
            let local = local.trim();
            (!prefix.is_empty() && !local.is_empty())
                .then(|| (prefix.to_string(), PathBuf::from(local)))
        })
        .collect()
}
