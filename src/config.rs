//! Configuration for w3files
//!
//! CLI arguments and environment variables via clap; a `.env` file in the
//! working directory is loaded first by the binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::endpoints::parse_http_url;

/// w3files - wallet-authenticated IPFS uploads with a local file catalog
#[derive(Parser, Debug, Clone)]
#[command(name = "w3files")]
#[command(about = "Upload files to IPFS through authenticated gateways and keep a local catalog")]
pub struct Args {
    /// Directory holding the catalog and keyring
    #[arg(long, env = "W3FILES_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Upload gateway URL (random known gateway if unset)
    #[arg(long, env = "W3FILES_GATEWAY", global = true)]
    pub gateway: Option<String>,

    /// Pinning service URL
    #[arg(long, env = "W3FILES_PINNER", global = true)]
    pub pinner: Option<String>,

    /// Address of the identity to sign with (first held identity if unset)
    #[arg(long, env = "W3FILES_IDENTITY", global = true)]
    pub identity: Option<String>,

    /// Passphrase for a locally held identity
    #[arg(long, env = "W3FILES_PASSPHRASE", global = true, hide_env_values = true)]
    pub passphrase: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty, global = true)]
    pub log_format: LogFormat,

    /// Per-request timeout in seconds (no timeout if unset)
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", global = true)]
    pub request_timeout_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Upload a file, pin it and record it in the catalog
    Upload {
        file: PathBuf,
    },
    /// List catalog entries
    List,
    /// Merge a files.json snapshot into the catalog
    Import {
        file: PathBuf,
    },
    /// Write the catalog as files.json
    Export {
        /// Target file or directory (current directory if unset)
        path: Option<PathBuf>,
    },
    /// Print the download link for a file
    Link {
        hash: String,
    },
    /// Download a cataloged file from its gateway
    Download {
        hash: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Manage signing identities
    #[command(subcommand)]
    Identity(IdentityCommand),
    /// List known gateways and pinning services
    Gateways,
}

#[derive(Subcommand, Debug, Clone)]
pub enum IdentityCommand {
    /// List held identities
    List,
    /// Generate a passphrase-protected local identity
    New {
        #[arg(long)]
        name: String,
    },
    /// Register an identity whose key is held by a signing agent
    AddDelegated {
        #[arg(long)]
        name: String,
        #[arg(long)]
        address: String,
        /// Agent base URL
        #[arg(long)]
        source: String,
    },
}

impl Args {
    /// Data directory, defaulting to the platform's local data dir
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("w3files")
        })
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        for (flag, value) in [("--gateway", &self.gateway), ("--pinner", &self.pinner)] {
            if let Some(url) = value {
                parse_http_url(url).map_err(|e| format!("{flag}: {e}"))?;
            }
        }

        if self.request_timeout_secs == Some(0) {
            return Err("REQUEST_TIMEOUT_SECS must be greater than zero".to_string());
        }

        if let Command::Identity(IdentityCommand::AddDelegated { source, .. }) = &self.command {
            parse_http_url(source).map_err(|e| format!("--source: {e}"))?;
        }

        Ok(())
    }
}
