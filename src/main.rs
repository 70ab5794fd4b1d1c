//! kinetic - command-line client for Kinetic drives
//!
//! Runs one command against a drive and prints the result.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use kinetic_client::{Client, ConnectionConfig, TlsClientConfig};
use kinetic_protocol::DEFAULT_PORT;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kinetic")]
#[command(about = "Command-line client for Kinetic key-value drives")]
#[command(version)]
struct Cli {
    /// Drive host name or address
    #[arg(short = 'H', long, default_value = "localhost", env = "KINETIC_HOST")]
    host: String,

    /// Drive port
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "KINETIC_PORT")]
    port: u16,

    /// Identity the commands are issued as
    #[arg(short, long, default_value_t = 1, env = "KINETIC_IDENTITY")]
    identity: i64,

    /// HMAC key shared with the drive for the identity
    #[arg(short, long, default_value = "asdfasdf", env = "KINETIC_SECRET")]
    secret: String,

    /// Cluster version the drive expects
    #[arg(long, default_value_t = 0)]
    cluster_version: i64,

    /// Largest single value write in bytes
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    /// Send/receive timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    // ===== TLS Options =====
    /// Enable TLS connection
    #[arg(long, env = "KINETIC_TLS")]
    tls: bool,

    /// Path to CA certificate for drive verification
    #[arg(long, env = "KINETIC_CA_CERT")]
    ca_cert: Option<PathBuf>,

    /// Path to client certificate (for mTLS)
    #[arg(long)]
    client_cert: Option<PathBuf>,

    /// Path to client private key (for mTLS)
    #[arg(long)]
    client_key: Option<PathBuf>,

    /// Skip drive certificate verification (INSECURE)
    #[arg(long, short = 'k')]
    insecure: bool,

    /// Server name for TLS SNI (defaults to the host)
    #[arg(long)]
    server_name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that the drive answers
    Noop,

    /// Store a value
    Put {
        /// Key (prefix with 0x for hex)
        key: String,

        /// Value (or @file to stream a file)
        value: String,

        /// Version to store with the value
        #[arg(long)]
        new_version: Option<String>,

        /// Only store if the drive holds this version (otherwise the put is forced)
        #[arg(long)]
        db_version: Option<String>,
    },

    /// Read a value
    Get {
        /// Key (prefix with 0x for hex)
        key: String,

        /// Write the value to this file instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Read the version and tag of a key
    GetMetadata {
        /// Key (prefix with 0x for hex)
        key: String,
    },

    /// Read the version of a key
    GetVersion {
        /// Key (prefix with 0x for hex)
        key: String,
    },

    /// Delete a key
    Delete {
        /// Key (prefix with 0x for hex)
        key: String,

        /// Only delete if the drive holds this version (otherwise the delete is forced)
        #[arg(long)]
        db_version: Option<String>,
    },

    /// Read the entry after a key
    GetNext {
        /// Key (prefix with 0x for hex)
        key: String,
    },

    /// Read the entry before a key
    GetPrevious {
        /// Key (prefix with 0x for hex)
        key: String,
    },

    /// List keys in a range
    KeyRange {
        /// First key of the range
        start: String,

        /// Last key of the range
        end: String,

        /// Maximum keys to return
        #[arg(short = 'n', long, default_value_t = 100)]
        max: u32,

        /// List in descending order
        #[arg(long)]
        reverse: bool,

        /// Exclude the start key
        #[arg(long)]
        exclusive_start: bool,

        /// Exclude the end key
        #[arg(long)]
        exclusive_end: bool,
    },

    /// Print every entry in a range
    Range {
        /// First key of the range
        start: String,

        /// Last key of the range
        end: String,

        /// Keys listed per request
        #[arg(long, default_value_t = 64)]
        prefetch: u32,
    },

    /// Validate a JSON list of access control entries
    CheckAcl {
        /// Path to the JSON file
        file: PathBuf,
    },
}

impl Commands {
    /// Returns whether the command talks to a drive.
    fn needs_drive(&self) -> bool {
        !matches!(self, Commands::CheckAcl { .. })
    }

    /// Returns whether values should stay on the socket until written out.
    fn streams_value(&self) -> bool {
        matches!(self, Commands::Get { output: Some(_), .. })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    if !cli.command.needs_drive() {
        return match commands::execute_local(cli.command).await {
            Ok(output) => {
                println!("{}", output);
                Ok(())
            }
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        };
    }

    // Build TLS config if any TLS option is set
    let tls_config =
        if cli.tls || cli.ca_cert.is_some() || cli.client_cert.is_some() || cli.insecure {
            let mut tls = TlsClientConfig::new();

            if let Some(ref path) = cli.ca_cert {
                tls = tls.with_ca_cert(path);
            }
            if let (Some(cert), Some(key)) = (&cli.client_cert, &cli.client_key) {
                tls = tls.with_client_cert(cert, key);
            } else if cli.client_cert.is_some() || cli.client_key.is_some() {
                eprintln!(
                    "{}: --client-cert and --client-key must be used together",
                    "Error".red()
                );
                std::process::exit(1);
            }
            if cli.insecure {
                tls = tls.with_insecure();
            }
            if let Some(ref name) = cli.server_name {
                tls = tls.with_server_name(name);
            }

            Some(tls)
        } else {
            None
        };

    let mut config = ConnectionConfig::new(&cli.host, cli.port)
        .with_identity(cli.identity)
        .with_secret(cli.secret.as_bytes())
        .with_cluster_version(cli.cluster_version)
        .with_connect_timeout(Duration::from_secs(cli.connect_timeout))
        .with_socket_timeout(Duration::from_secs(cli.timeout))
        .with_defer_read(cli.command.streams_value());
    if let Some(size) = cli.chunk_size {
        config = config.with_chunk_size(size);
    }
    if let Some(tls) = tls_config {
        config = config.with_tls(tls);
    }
    tracing::debug!(
        host = %cli.host,
        port = cli.port,
        tls = config.uses_tls(),
        "connecting to drive"
    );
    let client = Client::new(config);

    client.connect().await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;

    let result = commands::execute(&client, cli.command).await;
    client.close().await;

    match result {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}
