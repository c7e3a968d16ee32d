//! ems-security - operator CLI for the EMS security core.
//!
//! - `gen-key`: print a fresh base64 AES key
//! - `hash-password`: hash a passphrase read from stdin
//! - `check-config`: validate a security config file
//! - `add-account` / `login`: exercise the SQLite account store
//! - `lookup-hash`: print the search digest of a secret read from stdin

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use base64::Engine;
use clap::{Parser, Subcommand};
use ems_security::auth::{
    AuditSink, ClientInfo, FanoutAuditSink, Role, SqliteUserStore, TracingAuditSink,
};
use ems_security::{AuthenticationFlow, CredentialHasher, SecurityConfig, SensitiveFieldProtector};
use rand::RngCore;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zeroize::Zeroizing;

/// EMS security core CLI.
#[derive(Parser, Debug)]
#[command(name = "ems-security")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the security config (defaults to the per-user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a random base64 AES key
    GenKey {
        /// Key length in bytes (16, 24 or 32)
        #[arg(long, default_value = "32")]
        bytes: usize,
    },

    /// Hash a passphrase read from stdin
    HashPassword {
        /// bcrypt cost; overrides the config file
        #[arg(long)]
        work_factor: Option<u32>,
    },

    /// Validate a config file
    CheckConfig {
        /// File to check; falls back to --config or the default location
        path: Option<PathBuf>,
    },

    /// Create an account; the passphrase is read from stdin
    AddAccount {
        /// Account database
        #[arg(long)]
        db: PathBuf,

        #[arg(long)]
        username: String,

        /// Role name, e.g. HR_ADMIN or EMPLOYEE
        #[arg(long)]
        role: Option<String>,

        /// Employee record this account owns
        #[arg(long)]
        linked_resource: Option<i64>,
    },

    /// Authenticate against the account database; passphrase from stdin
    Login {
        /// Account database
        #[arg(long)]
        db: PathBuf,

        #[arg(long)]
        username: String,

        /// Source address recorded in the audit log
        #[arg(long)]
        source_address: Option<String>,
    },

    /// Print the hex lookup digest of a secret read from stdin
    LookupHash,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // stderr only; stdout carries command output
    ems_security::logging::init_tracing(&cli.log_level);

    match cli.command {
        Commands::GenKey { bytes } => gen_key(bytes),
        Commands::HashPassword { work_factor } => {
            let hasher = match work_factor {
                Some(wf) => CredentialHasher::new(wf)?,
                None => CredentialHasher::from_config(&load_config(cli.config.as_deref())?.password)?,
            };
            hash_password(&hasher)
        }
        Commands::CheckConfig { path } => check_config(path.as_deref().or(cli.config.as_deref())),
        Commands::AddAccount {
            db,
            username,
            role,
            linked_resource,
        } => {
            let config = load_config(cli.config.as_deref())?;
            add_account(&config, &db, &username, role.as_deref(), linked_resource)
        }
        Commands::Login {
            db,
            username,
            source_address,
        } => {
            let config = load_config(cli.config.as_deref())?;
            login(&config, &db, &username, source_address)
        }
        Commands::LookupHash => {
            let config = load_config(cli.config.as_deref())?;
            lookup_hash(&config)
        }
    }
}

fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => SecurityConfig::default_path()
            .context("no --config given and no per-user config directory available"),
    }
}

fn load_config(explicit: Option<&Path>) -> Result<SecurityConfig> {
    let path = config_path(explicit)?;
    Ok(SecurityConfig::load(&path)?)
}

/// One line from stdin without its line terminator.
fn read_stdin_line() -> Result<Zeroizing<String>> {
    let mut line = Zeroizing::new(String::new());
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read stdin")?;
    let trimmed_len = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed_len);
    Ok(line)
}

fn gen_key(bytes: usize) -> Result<()> {
    if !matches!(bytes, 16 | 24 | 32) {
        anyhow::bail!("key length must be 16, 24 or 32 bytes, got {bytes}");
    }
    let mut key = Zeroizing::new(vec![0u8; bytes]);
    rand::rngs::OsRng.fill_bytes(&mut key);
    println!("{}", base64::engine::general_purpose::STANDARD.encode(&*key));
    Ok(())
}

fn hash_password(hasher: &CredentialHasher) -> Result<()> {
    let passphrase = read_stdin_line()?;
    let credential = hasher.hash(&passphrase)?;
    let b64 = base64::engine::general_purpose::STANDARD;
    let out = serde_json::json!({
        "hash": b64.encode(credential.hash()),
        "salt": b64.encode(credential.salt()),
        "work_factor": hasher.work_factor(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn check_config(explicit: Option<&Path>) -> Result<()> {
    let path = config_path(explicit)?;
    let config = SecurityConfig::load(&path)?;
    println!("{}: ok", path.display());
    println!("  cipher:          {}", config.secrets.cipher);
    println!("  lookup hash:     {:?}", config.secrets.lookup_hash);
    println!("  session timeout: {} min", config.session.timeout_minutes);
    Ok(())
}

fn add_account(
    config: &SecurityConfig,
    db: &Path,
    username: &str,
    role: Option<&str>,
    linked_resource: Option<i64>,
) -> Result<()> {
    let role = role.map(Role::new).transpose()?;
    let hasher = CredentialHasher::from_config(&config.password)?;
    let passphrase = read_stdin_line()?;
    let credential = hasher.hash(&passphrase)?;

    let store = SqliteUserStore::open(db)
        .with_context(|| format!("failed to open account database {}", db.display()))?;
    let id = store.create_account(username, &credential, role.as_ref(), linked_resource)?;
    println!("{}", serde_json::json!({ "account_id": id, "username": username.trim() }));
    Ok(())
}

fn login(
    config: &SecurityConfig,
    db: &Path,
    username: &str,
    source_address: Option<String>,
) -> Result<()> {
    let store = Arc::new(
        SqliteUserStore::open(db)
            .with_context(|| format!("failed to open account database {}", db.display()))?,
    );
    let audit: Arc<dyn AuditSink> = Arc::new(
        FanoutAuditSink::new()
            .with(store.clone())
            .with(Arc::new(TracingAuditSink)),
    );
    let flow = AuthenticationFlow::from_config(config, store, audit)?;

    let mut client = ClientInfo::new(config.audit.client_label.clone());
    if let Some(address) = source_address {
        client = client.with_source_address(address);
    }

    let passphrase = read_stdin_line()?;
    let session = flow.login_from(username, &passphrase, client)?;
    let out = serde_json::json!({
        "session_id": session.id().to_string(),
        "account_id": session.account_id(),
        "role": session.role().as_str(),
        "linked_resource_id": session.linked_resource_id(),
        "expires_in_secs": session.remaining_time().as_secs(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    flow.logout(&session);
    Ok(())
}

fn lookup_hash(config: &SecurityConfig) -> Result<()> {
    let protector = SensitiveFieldProtector::from_config(&config.secrets)?;
    let secret = read_stdin_line()?;
    println!("{}", hex::encode(protector.lookup_hash(&secret)));
    Ok(())
}
