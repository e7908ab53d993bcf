//! `noted-server` binary: parses CLI + environment into a
//! `ServerConfig`, wires a `SqliteStore`, and runs the supervisor.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use noted_core::supervisor::{Supervisor, SupervisorConfig};
use tracing::info;

/// Multi-user collaborative note server.
#[derive(Parser, Debug)]
#[command(name = "noted-server")]
#[command(about = "Collaborative note-editor server")]
struct Args {
    /// TCP port to listen on.
    #[arg(default_value_t = 12345)]
    port: u16,

    /// Directory for the SQLite database and summary content/history.
    #[arg(long, value_name = "DIR", default_value = "data")]
    data_dir: PathBuf,

    /// File holding the server-wide password pepper. Generated on
    /// first run if missing.
    #[arg(long, value_name = "FILE", default_value = "pepper.key")]
    pepper_file: PathBuf,

    /// File holding the RSA-2048 server keypair (PKCS8 PEM). Generated
    /// on first run if missing.
    #[arg(long, value_name = "FILE", default_value = "server_key.pem")]
    rsa_key_file: PathBuf,

    /// Verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

/// Merged CLI + environment configuration. Constructed once in `main`
/// and handed down by value/`Arc`, never re-read per request.
struct ServerConfig {
    port: u16,
    data_dir: PathBuf,
    pepper_file: PathBuf,
    rsa_key_file: PathBuf,
    #[allow(dead_code)]
    db_host: Option<String>,
    #[allow(dead_code)]
    db_port: Option<u16>,
    #[allow(dead_code)]
    db_name: Option<String>,
    #[allow(dead_code)]
    db_username: Option<String>,
    #[allow(dead_code)]
    db_password: Option<String>,
}

impl ServerConfig {
    fn from_args(args: Args) -> Self {
        Self {
            port: args.port,
            data_dir: args.data_dir,
            pepper_file: args.pepper_file,
            rsa_key_file: args.rsa_key_file,
            db_host: std::env::var("DB_HOST").ok(),
            db_port: std::env::var("DB_PORT").ok().and_then(|v| v.parse().ok()),
            db_name: std::env::var("DB_NAME").ok(),
            db_username: std::env::var("DB_USERNAME").ok(),
            db_password: std::env::var("DB_PASSWORD").ok(),
        }
    }
}

fn load_or_create_pepper(path: &PathBuf) -> std::io::Result<Vec<u8>> {
    if let Ok(existing) = std::fs::read(path) {
        return Ok(existing);
    }
    let pepper = noted_core::crypto::random_bytes(32);
    std::fs::write(path, &pepper)?;
    Ok(pepper)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_tracing(args.verbose);

    let config = ServerConfig::from_args(args);
    std::fs::create_dir_all(&config.data_dir)?;

    info!(port = config.port, data_dir = %config.data_dir.display(), "starting noted-server");

    let pepper = load_or_create_pepper(&config.pepper_file)?;
    let store = Arc::new(noted_store_fs::SqliteStore::open(&config.data_dir)?);

    let supervisor = Supervisor::bind(
        SupervisorConfig {
            bind_port: config.port,
            rsa_key_path: config.rsa_key_file,
            pepper,
        },
        store,
    )
    .await?;

    supervisor.run().await?;
    Ok(())
}

fn setup_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("noted_core=debug,noted_store_fs=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
