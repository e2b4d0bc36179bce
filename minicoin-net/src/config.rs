/*!
Configuration loader for the node.

`Config::from_env()` reads environment variables (honoring a `.env` file);
the binary's CLI flags override whatever the environment provided.
*/

use std::env;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;

/// Default directory for the state store and peer registry.
const DEFAULT_DATA_DIR: &str = ".minicoin";

/// Error type for config parsing issues.
#[derive(Debug)]
pub struct ConfigError(String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigError: {}", self.0)
    }
}

impl Error for ConfigError {}

/// Node configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// TCP port to listen on; an ephemeral port when absent.
    pub port: Option<u16>,

    /// Directory holding the state store and the online-peers registry.
    pub data_dir: PathBuf,

    /// Whether this node mines.
    pub mining: bool,

    /// Multiaddress of a peer to dial and sync from at startup. When absent
    /// a random entry from the online-peers registry is tried.
    pub peer: Option<String>,

    /// Port for the wallet-facing RPC server; RPC is disabled when absent.
    pub rpc_port: Option<u16>,

    /// Deterministic seed for the miner wallet; a random wallet otherwise.
    pub miner_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: None,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            mining: false,
            peer: None,
            rpc_port: None,
            miner_seed: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables or a `.env` file.
    ///
    /// Recognized environment variables:
    /// - `MINICOIN_PORT` - optional listen port (u16)
    /// - `MINICOIN_DATA_DIR` - optional state directory
    /// - `MINICOIN_MINING` - optional boolean. Accepts `1`, `true`, `yes`, `on`.
    /// - `MINICOIN_PEER` - optional multiaddress to sync from
    /// - `MINICOIN_RPC_PORT` - optional RPC port (u16)
    /// - `MINICOIN_MINER_SEED` - optional u64 seed for the miner wallet
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env if present, ignore errors
        let _ = dotenvy::dotenv();

        let port = parse_optional("MINICOIN_PORT", |s| s.parse::<u16>())?;
        let rpc_port = parse_optional("MINICOIN_RPC_PORT", |s| s.parse::<u16>())?;
        let miner_seed = parse_optional("MINICOIN_MINER_SEED", |s| s.parse::<u64>())?;

        let data_dir = match env::var("MINICOIN_DATA_DIR").ok() {
            Some(s) if !s.trim().is_empty() => PathBuf::from(s.trim()),
            _ => PathBuf::from(DEFAULT_DATA_DIR),
        };

        let mining = match env::var("MINICOIN_MINING").ok() {
            Some(s) if !s.trim().is_empty() => parse_bool(&s).map_err(|_| {
                ConfigError(format!("failed to parse MINICOIN_MINING='{}' as boolean", s))
            })?,
            _ => false,
        };

        let peer = env::var("MINICOIN_PEER")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Config {
            port,
            data_dir,
            mining,
            peer,
            rpc_port,
            miner_seed,
        })
    }
}

fn parse_optional<T, E: fmt::Display>(
    var: &str,
    parse: impl Fn(&str) -> Result<T, E>,
) -> Result<Option<T>, ConfigError> {
    match env::var(var).ok() {
        Some(s) if !s.trim().is_empty() => parse(s.trim())
            .map(Some)
            .map_err(|e| ConfigError(format!("failed to parse {}='{}': {}", var, s, e))),
        _ => Ok(None),
    }
}

/// Parse a boolean-like string. Accepts `1`, `true`, `yes`, `on` as true;
/// `0`, `false`, `no`, `off` as false.
fn parse_bool(s: &str) -> Result<bool, ()> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(()),
    }
}
