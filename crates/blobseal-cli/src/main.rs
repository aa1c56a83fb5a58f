//! blobseal: envelope-encrypted blob storage CLI
//!
//! Commands:
//!   keygen [--output <file>]                        - generate a master secret
//!   put <id> <file> --identity <id>                 - seal a local file into the store
//!   get <id> (--identity <id> | --admin) [-o <file>] - open a sealed blob
//!   inspect <id>                                    - validate stored crypto headers
//!   config show                                     - display current configuration

use anyhow::{Context, Result};
use blobseal_core::config::{LogFormat, StorageBackend};
use blobseal_core::BlobsealConfig;
use blobseal_crypto::{
    generate_master_secret, OsRandom, Principal, SealError, SecretRegistry, Sealer,
};
use blobseal_storage::{build_operator, OpendalBlobStore, SealedStore};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::ExposeSecret;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "blobseal",
    version,
    about = "Envelope-encrypted blob storage",
    long_about = "blobseal: seal blobs for a user and an administrator under rotating master secrets"
)]
struct Cli {
    /// Path to blobseal.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "BLOBSEAL_CONFIG",
        default_value = "/etc/blobseal/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "BLOBSEAL_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides [log] format
    #[arg(long, env = "BLOBSEAL_LOG_FORMAT")]
    log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormatArg {
    Json,
    Text,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Text => LogFormat::Text,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a new master secret and print its fingerprint
    Keygen {
        /// Write the base64 secret to this file (mode 0600) instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Seal a local file for a user (and the admin) and store it
    Put {
        /// Blob id in the store
        id: String,
        /// Local file to seal
        file: PathBuf,
        /// Identity of the data owner
        #[arg(long, short = 'i')]
        identity: String,
    },

    /// Open a sealed blob as its owner or as the admin
    Get {
        /// Blob id in the store
        id: String,
        /// Open as this user identity
        #[arg(long, short = 'i', conflicts_with = "admin", required_unless_present = "admin")]
        identity: Option<String>,
        /// Open with the admin envelope
        #[arg(long)]
        admin: bool,
        /// Write plaintext here instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Parse and validate a blob's stored crypto headers
    Inspect {
        /// Blob id in the store
        id: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config, cli.log.as_deref())?;

    let level = cli.log.as_deref().unwrap_or(&config.log.level);
    let format = cli.log_format.map(LogFormat::from).unwrap_or(config.log.format);
    init_logging(level, format);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "blobseal starting"
    );

    match cli.command {
        Commands::Keygen { output } => cmd_keygen(output.as_deref()),
        Commands::Put { id, file, identity } => cmd_put(&config, &id, &file, &identity).await,
        Commands::Get { id, identity, admin, output } => {
            let principal = match identity {
                Some(identity) if !admin => Principal::User(identity),
                _ => Principal::Admin,
            };
            cmd_get(&config, &id, &principal, output.as_deref()).await
        }
        Commands::Inspect { id } => cmd_inspect(&config, &id).await,
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries plaintext for `get`, so logs go to stderr
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

fn load_config(path: &Path, log: Option<&str>) -> Result<BlobsealConfig> {
    use tracing_subscriber::EnvFilter;

    // [log] is not known until the file is read; report loading problems to stderr meanwhile
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log.unwrap_or("warn")));
    let bootstrap = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .finish();

    tracing::subscriber::with_default(bootstrap, || BlobsealConfig::load(path))
        .with_context(|| format!("loading config: {}", path.display()))
}

// ── Store construction ────────────────────────────────────────────────────────

fn open_store(config: &BlobsealConfig) -> Result<SealedStore<OpendalBlobStore>> {
    let registry = SecretRegistry::from_config(&config.secrets).context("loading master secrets")?;

    if config.storage.backend == StorageBackend::Memory {
        tracing::warn!("memory storage backend: blobs do not outlive this process");
    }
    let op = build_operator(&config.storage).context("building storage operator")?;
    let store = OpendalBlobStore::new(op, config.storage.header_placement)?;

    Ok(SealedStore::new(store, Sealer::new(Arc::new(registry))))
}

// ── `blobseal keygen` ─────────────────────────────────────────────────────────

fn cmd_keygen(output: Option<&Path>) -> Result<()> {
    let generated = generate_master_secret(&OsRandom)?;

    match output {
        Some(path) => {
            write_private(path, generated.encoded.expose_secret().as_bytes())
                .with_context(|| format!("writing secret file: {}", path.display()))?;
            println!("wrote master secret to {}", path.display());
            println!("fingerprint: {}", generated.fingerprint);
            println!();
            println!("Add to blobseal.toml:");
            println!("  [[secrets.master]]");
            println!("  secret_file = {:?}", path.display().to_string());
        }
        None => {
            println!("fingerprint: {}", generated.fingerprint);
            println!("secret:      {}", generated.encoded.expose_secret());
        }
    }
    Ok(())
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    file.write_all(b"\n")
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(contents)?;
    file.write_all(b"\n")
}

// ── `blobseal put` ────────────────────────────────────────────────────────────

async fn cmd_put(config: &BlobsealConfig, id: &str, file: &Path, identity: &str) -> Result<()> {
    let store = open_store(config)?;
    let plaintext = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;

    let meta = store
        .put(id, identity, &plaintext)
        .await
        .with_context(|| format!("sealing {} as {id}", file.display()))?;

    println!(
        "sealed {} → {id} ({} bytes, fingerprint {})",
        file.display(),
        plaintext.len(),
        meta.global_fingerprint
    );
    Ok(())
}

// ── `blobseal get` ────────────────────────────────────────────────────────────

async fn cmd_get(
    config: &BlobsealConfig,
    id: &str,
    principal: &Principal,
    output: Option<&Path>,
) -> Result<()> {
    let store = open_store(config)?;
    let plaintext = store.get(id, principal).await.map_err(|e| describe_open_error(id, e))?;

    match output {
        Some(path) => {
            tokio::fs::write(path, &plaintext)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            eprintln!("opened {id} → {} ({} bytes)", path.display(), plaintext.len());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&plaintext).context("writing to stdout")?;
            stdout.flush().context("writing to stdout")?;
        }
    }
    Ok(())
}

fn describe_open_error(id: &str, err: anyhow::Error) -> anyhow::Error {
    let hint = match err.downcast_ref::<SealError>() {
        Some(SealError::AuthenticationFailure(_)) => {
            "wrong identity, or the blob or its headers were modified"
        }
        Some(SealError::UnknownFingerprint(_)) => {
            "the secret that sealed this blob is not in secrets.master"
        }
        _ => return err.context(format!("opening {id}")),
    };
    err.context(format!("opening {id}: {hint}"))
}

// ── `blobseal inspect` ────────────────────────────────────────────────────────

async fn cmd_inspect(config: &BlobsealConfig, id: &str) -> Result<()> {
    let store = open_store(config)?;

    let meta = match store.inspect(id).await {
        Ok(meta) => meta,
        Err(e) => {
            if let Some(SealError::Validation(errors)) = e.downcast_ref::<SealError>() {
                println!("{id}: {} header problem(s)", errors.len());
                for problem in errors.iter() {
                    println!("  - {problem}");
                }
                anyhow::bail!("{id}: invalid crypto headers");
            }
            return Err(e.context(format!("inspecting {id}")));
        }
    };

    println!("id:            {id}");
    println!("key version:   {}", meta.key_version.as_str());
    println!("algorithm:     {}", meta.algorithm.as_str());
    println!("fingerprint:   {}", meta.global_fingerprint);
    println!("salt:          {} bytes", meta.salt.as_bytes().len());
    println!("user wrap:     {} bytes", meta.user.wrapped_key.len());
    println!("admin wrap:    {} bytes", meta.admin.wrapped_key.len());
    if meta.global_fingerprint == store.sealer().registry().primary_fingerprint() {
        println!("status:        current (primary secret)");
    } else {
        println!("status:        sealed under a non-primary secret; re-seal to rotate");
    }
    Ok(())
}

// ── `blobseal config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &BlobsealConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
