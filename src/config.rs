//! Configuration types for kvsafe
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Target configuration (address, token, timeout) with validation
//! - Backend address parsing

use crate::backend::ClientConfig;
use crate::error::ConfigError;
use clap::{Args, Parser, Subcommand};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

/// Longest request timeout accepted
const MAX_TIMEOUT_SECS: u64 = 3600;

/// Default mount used when a tree command gets no path
pub const DEFAULT_PATH: &str = "secret";

/// Regex for backend addresses: [scheme://]host[:port][/]
static ADDR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(https?)://)?([A-Za-z0-9][A-Za-z0-9.\-]*|\[[0-9A-Fa-f:]+\])(?::(\d{1,5}))?/?$")
        .expect("Invalid address regex")
});

/// Operator CLI for Vault-compatible KV secret stores
#[derive(Parser, Debug, Clone)]
#[command(
    name = "safe",
    version,
    about = "Operator CLI for Vault-compatible KV secret stores",
    long_about = "Lists, walks, reads, exports and imports secrets stored in KV v1 and KV v2 \
                  mounts of a Vault-compatible server.\n\n\
                  Tree-shaped commands (tree, paths, export) crawl the backend with a small \
                  pool of worker threads.",
    after_help = "EXAMPLES:\n    \
        safe ls\n    \
        safe tree secret/app --keys\n    \
        safe paths -q secret\n    \
        safe get secret/app/db:password^2\n    \
        safe export -a secret/app > backup.json\n    \
        safe import < backup.json"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Backend address (https://host:port)
    #[arg(long, env = "VAULT_ADDR", global = true, value_name = "URL")]
    pub addr: Option<String>,

    /// Authentication token (falls back to ~/.vault-token)
    #[arg(long, env = "VAULT_TOKEN", global = true, hide_env_values = true, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value = "30", global = true, value_name = "SECS")]
    pub timeout: u64,

    /// Skip TLS certificate verification
    #[arg(short = 'k', long, env = "VAULT_SKIP_VERIFY", global = true)]
    pub insecure: bool,

    /// Tree worker threads (1-3, defaults to the CPU count)
    #[arg(short = 'w', long, global = true, value_name = "NUM")]
    pub workers: Option<usize>,

    /// Show a progress spinner while crawling
    #[arg(short = 'p', long, global = true)]
    pub progress: bool,

    /// Verbose logging
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the keys and sub-directories at one or more paths
    Ls(LsArgs),

    /// Print a tree listing of one or more paths
    Tree(TreeArgs),

    /// Print every known path, one per line
    Paths(PathsArgs),

    /// Print the key/value pairs (or a single value) of one or more secrets
    Get(GetArgs),

    /// Print the versions of one or more secrets
    Versions(VersionsArgs),

    /// Export one or more subtrees as JSON for backup or migration
    Export(ExportArgs),

    /// Import a JSON export
    Import(ImportArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct LsArgs {
    /// One entry per line
    #[arg(short = '1')]
    pub single: bool,

    /// Also show v2 secrets that have been deleted
    #[arg(short, long)]
    pub quick: bool,

    /// Paths to list (defaults to the mount list)
    pub paths: Vec<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct TreeArgs {
    /// Only show directories
    #[arg(short = 'd', long = "hide-leaves")]
    pub hide_leaves: bool,

    /// Do not read v2 secrets to filter out deleted ones
    #[arg(short, long)]
    pub quick: bool,

    /// Show the keys of every secret
    #[arg(long)]
    pub keys: bool,

    /// Paths to walk (defaults to `secret`)
    pub paths: Vec<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct PathsArgs {
    /// Do not read v2 secrets to filter out deleted ones
    #[arg(short, long)]
    pub quick: bool,

    /// List `path:key` for every key
    #[arg(long)]
    pub keys: bool,

    /// Paths to walk (defaults to `secret`)
    pub paths: Vec<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GetArgs {
    /// Only print key names
    #[arg(long)]
    pub keys: bool,

    /// Secrets to read: PATH[:KEY][^VERSION]
    #[arg(required = true)]
    pub paths: Vec<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct VersionsArgs {
    /// Secrets to inspect
    #[arg(required = true)]
    pub paths: Vec<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ExportArgs {
    /// Export every version, not just the latest
    #[arg(short = 'a', long)]
    pub all: bool,

    /// Keep deleted versions (undeleting them briefly to read them)
    #[arg(short = 'd', long)]
    pub deleted: bool,

    /// Do not record the first version number
    #[arg(long)]
    pub shallow: bool,

    /// Paths to export (defaults to `secret`)
    pub paths: Vec<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ImportArgs {
    /// Do not write versions marked deleted
    #[arg(short = 'i', long)]
    pub ignore_deleted: bool,

    /// Only write the latest version of each secret
    #[arg(short = 's', long)]
    pub shallow: bool,

    /// Do not recreate destroyed versions (version numbers will shift)
    #[arg(short = 'I', long)]
    pub ignore_destroyed: bool,

    /// Export file (reads stdin when omitted)
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,
}

/// Validated backend target
#[derive(Debug, Clone)]
pub struct TargetConfig {
    /// Normalized address (scheme://host[:port])
    pub addr: String,

    pub token: String,

    pub timeout: Duration,

    pub skip_verify: bool,
}

impl TargetConfig {
    /// Create and validate a target from CLI arguments
    pub fn from_args(args: &CliArgs) -> Result<Self, ConfigError> {
        let addr = args
            .addr
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .ok_or(ConfigError::MissingAddress)?;
        let addr = normalize_addr(addr)?;

        if args.timeout == 0 || args.timeout > MAX_TIMEOUT_SECS {
            return Err(ConfigError::InvalidTimeout {
                secs: args.timeout,
                max: MAX_TIMEOUT_SECS,
            });
        }

        let token_file = token_file();
        let token = resolve_token(args.token.as_deref(), token_file.as_deref())?;

        debug!(addr = %addr, timeout = args.timeout, insecure = args.insecure, "Target configured");

        Ok(Self {
            addr,
            token,
            timeout: Duration::from_secs(args.timeout),
            skip_verify: args.insecure,
        })
    }

    /// Settings for the HTTP client
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            addr: self.addr.clone(),
            token: self.token.clone(),
            timeout: self.timeout,
            skip_verify: self.skip_verify,
        }
    }
}

/// Parse and normalize a backend address
///
/// Accepts:
/// - https://vault.example.com:8200
/// - http://127.0.0.1:8200/
/// - vault.example.com (scheme defaults to https)
pub fn normalize_addr(addr: &str) -> Result<String, ConfigError> {
    let addr = addr.trim();
    let invalid = |reason: &str| ConfigError::InvalidAddress {
        addr: addr.to_string(),
        reason: reason.to_string(),
    };

    let caps = ADDR_REGEX
        .captures(addr)
        .ok_or_else(|| invalid("expected [http(s)://]host[:port]"))?;

    let scheme = caps.get(1).map(|m| m.as_str()).unwrap_or("https");
    let host = caps
        .get(2)
        .ok_or_else(|| invalid("missing host"))?
        .as_str();

    match caps.get(3) {
        Some(port) => {
            let port = port
                .as_str()
                .parse::<u16>()
                .map_err(|_| invalid("port out of range"))?;
            Ok(format!("{}://{}:{}", scheme, host, port))
        }
        None => Ok(format!("{}://{}", scheme, host)),
    }
}

/// Location of the token file written by `vault login`
pub fn token_file() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".vault-token"))
}

/// Pick the token from the flag/environment, else from the token file
fn resolve_token(explicit: Option<&str>, file: Option<&Path>) -> Result<String, ConfigError> {
    if let Some(token) = explicit.map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(token.to_string());
    }

    file.and_then(|path| std::fs::read_to_string(path).ok())
        .map(|contents| contents.trim().to_string())
        .filter(|token| !token.is_empty())
        .ok_or(ConfigError::MissingToken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_normalize_addr() {
        assert_eq!(
            normalize_addr("https://vault.example.com:8200").unwrap(),
            "https://vault.example.com:8200"
        );
        assert_eq!(
            normalize_addr("http://127.0.0.1:8200/").unwrap(),
            "http://127.0.0.1:8200"
        );
        assert_eq!(
            normalize_addr("vault.example.com").unwrap(),
            "https://vault.example.com"
        );
        assert_eq!(normalize_addr("[::1]:8200").unwrap(), "https://[::1]:8200");
    }

    #[test]
    fn test_normalize_addr_invalid() {
        assert!(normalize_addr("ftp://vault").is_err());
        assert!(normalize_addr("vault:99999").is_err());
        assert!(normalize_addr("https://").is_err());
        assert!(normalize_addr("vault example").is_err());
    }

    #[test]
    fn test_resolve_token() {
        assert_eq!(resolve_token(Some(" s.abc "), None).unwrap(), "s.abc");
        assert_eq!(resolve_token(None, None), Err(ConfigError::MissingToken));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "s.from-file").unwrap();
        assert_eq!(
            resolve_token(None, Some(file.path())).unwrap(),
            "s.from-file"
        );
        assert_eq!(
            resolve_token(Some(""), Some(file.path())).unwrap(),
            "s.from-file"
        );
    }

    #[test]
    fn test_cli_parsing() {
        let args = CliArgs::try_parse_from([
            "safe",
            "--addr",
            "https://vault:8200",
            "--token",
            "t",
            "tree",
            "-d",
            "secret/app",
        ])
        .unwrap();

        match &args.command {
            Command::Tree(tree) => {
                assert!(tree.hide_leaves);
                assert_eq!(tree.paths, vec!["secret/app"]);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let target = TargetConfig::from_args(&args).unwrap();
        assert_eq!(target.addr, "https://vault:8200");
        assert_eq!(target.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_timeout() {
        let args = CliArgs::try_parse_from([
            "safe", "--addr", "vault", "--token", "t", "--timeout", "0", "ls",
        ])
        .unwrap();
        assert!(matches!(
            TargetConfig::from_args(&args),
            Err(ConfigError::InvalidTimeout { secs: 0, .. })
        ));
    }

    #[test]
    fn test_import_flags() {
        let args = CliArgs::try_parse_from(["safe", "import", "-I", "-i", "backup.json"]).unwrap();
        match &args.command {
            Command::Import(import) => {
                assert!(import.ignore_destroyed);
                assert!(import.ignore_deleted);
                assert!(!import.shallow);
                assert_eq!(import.file.as_deref(), Some(Path::new("backup.json")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_get_requires_path() {
        assert!(CliArgs::try_parse_from(["safe", "get"]).is_err());
    }
}
