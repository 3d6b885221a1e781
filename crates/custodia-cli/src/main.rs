//! custodia: passphrase-protected field encryption from the command line
//!
//! Commands:
//!   unlock | init                   - unlock a profile, bootstrapping it on first use
//!   rotate                          - re-wrap the master key under a new passphrase
//!   encrypt <field=value>...        - encrypt fields of a record and store them
//!   decrypt <field>...              - read and decrypt fields of a record
//!   blind-index <value>             - print the search token for a value
//!   config show                     - display the effective configuration
//!
//! The passphrase is read from CUSTODIA_PASSPHRASE when set, otherwise
//! prompted for on the terminal.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use custodia_core::config::CustodiaConfig;
use custodia_keys::{Session, Vault};
use custodia_store::{JsonFileStore, RecordStore};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "custodia",
    version,
    about = "Client-side key management and field encryption",
    long_about = "custodia: unlock a passphrase-protected key hierarchy and encrypt, \
                  decrypt or blind-index record fields"
)]
struct Cli {
    /// Path to custodia.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "CUSTODIA_CONFIG",
        default_value = "~/.config/custodia/config.toml"
    )]
    config: PathBuf,

    /// JSON record store (overrides store.path from the config)
    #[arg(long, env = "CUSTODIA_STORE", global = true)]
    store: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides log.level
    #[arg(long, env = "CUSTODIA_LOG", global = true)]
    log: Option<String>,

    /// Log format; overrides log.format
    #[arg(long, env = "CUSTODIA_LOG_FORMAT", global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Unlock a profile, creating its master key on first use
    #[command(visible_alias = "init")]
    Unlock {
        #[arg(long, short = 'u')]
        user: String,
    },

    /// Change the passphrase protecting the master key
    Rotate {
        #[arg(long, short = 'u')]
        user: String,
    },

    /// Encrypt `field=value` pairs for one record and write them to the store
    ///
    /// Values are parsed as JSON when possible (`vat=12345` stores a number),
    /// otherwise stored as strings.
    Encrypt {
        #[command(flatten)]
        record: RecordArgs,
        /// Field assignments, e.g. name="Bar Centrale"
        #[arg(required = true, value_parser = parse_assignment)]
        fields: Vec<(String, Value)>,
    },

    /// Read and decrypt fields of one record
    Decrypt {
        #[command(flatten)]
        record: RecordArgs,
        /// Field names to decrypt
        #[arg(required = true)]
        fields: Vec<String>,
    },

    /// Print the blind index (equality search token) of a value
    #[command(name = "blind-index")]
    BlindIndex {
        #[arg(long, short = 'u')]
        user: String,
        #[arg(long, short = 's')]
        scope: String,
        value: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug)]
struct RecordArgs {
    #[arg(long, short = 'u')]
    user: String,
    /// Key scope (data category), e.g. accounts
    #[arg(long, short = 's')]
    scope: String,
    #[arg(long, short = 't')]
    table: String,
    /// Record identifier bound into every field's AAD
    #[arg(long, short = 'r')]
    record: String,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = load_config(&config_path).await?;

    let level = cli.log.as_deref().unwrap_or(config.log.level.as_str());
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| LogFormat::from_config(&config.log.format));
    init_logging(level, &format);

    let store_path = expand_tilde(cli.store.as_deref().unwrap_or(config.store.path.as_path()));
    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        store = %store_path.display(),
        "custodia starting"
    );

    match cli.command {
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &config_path),
        Commands::Unlock { user } => cmd_unlock(&config, &store_path, &user).await,
        Commands::Rotate { user } => cmd_rotate(&config, &store_path, &user).await,
        Commands::Encrypt { record, fields } => {
            cmd_encrypt(&config, &store_path, &record, fields).await
        }
        Commands::Decrypt { record, fields } => {
            cmd_decrypt(&config, &store_path, &record, &fields).await
        }
        Commands::BlindIndex { user, scope, value } => {
            cmd_blind_index(&config, &store_path, &user, &scope, &value).await
        }
    }
}

// ── Config + logging ──────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<CustodiaConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        CustodiaConfig::from_toml_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(CustodiaConfig::default())
    }
}

impl LogFormat {
    fn from_config(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Logs go to stderr; stdout carries command output only.
fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

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

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}

// ── Passphrase + session helpers ──────────────────────────────────────────────

fn read_passphrase(env_var: &str, prompt: &str) -> Result<SecretString> {
    if let Ok(value) = std::env::var(env_var) {
        return Ok(SecretString::from(value));
    }
    let value = rpassword::prompt_password(prompt).context("reading passphrase")?;
    Ok(SecretString::from(value))
}

/// Read a passphrase that is about to protect a master key.
///
/// Prompted values are entered twice; a value taken from `env_var` is not.
fn read_new_passphrase(env_var: &str, prompt: &str) -> Result<SecretString> {
    let new_pass = read_passphrase(env_var, prompt)?;
    let confirm = if std::env::var(env_var).is_err() {
        let again = rpassword::prompt_password("Repeat passphrase: ").context("reading passphrase")?;
        Some(SecretString::from(again))
    } else {
        None
    };
    check_new_passphrase(&new_pass, confirm.as_ref())?;
    Ok(new_pass)
}

fn check_new_passphrase(new_pass: &SecretString, confirm: Option<&SecretString>) -> Result<()> {
    if new_pass.expose_secret().is_empty() {
        anyhow::bail!("passphrase must not be empty");
    }
    if let Some(confirm) = confirm {
        if confirm.expose_secret() != new_pass.expose_secret() {
            anyhow::bail!("passphrases do not match");
        }
    }
    Ok(())
}

async fn open_store(path: &Path) -> Result<Arc<JsonFileStore>> {
    let store = JsonFileStore::open(path)
        .await
        .with_context(|| format!("opening record store: {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Unlock an existing profile. Only `unlock`/`init` may create one.
async fn open_session(config: &CustodiaConfig, store_path: &Path, user: &str) -> Result<Session> {
    let store = open_store(store_path).await?;
    let exists = store
        .get_profile_key_material(user)
        .await
        .context("reading profile key material")?
        .is_some();
    if !exists {
        anyhow::bail!("no profile for '{user}'; run `custodia init` first");
    }
    let passphrase = read_passphrase("CUSTODIA_PASSPHRASE", "Passphrase: ")?;
    Vault::new(store, config.kdf.clone())
        .unlock(user, &passphrase)
        .await
        .with_context(|| format!("unlocking profile '{user}'"))
}

// ── `custodia unlock` ─────────────────────────────────────────────────────────

async fn cmd_unlock(config: &CustodiaConfig, store_path: &Path, user: &str) -> Result<()> {
    let store = open_store(store_path).await?;
    let existed = store
        .get_profile_key_material(user)
        .await
        .context("reading profile key material")?
        .is_some();

    let passphrase = if existed {
        read_passphrase("CUSTODIA_PASSPHRASE", "Passphrase: ")?
    } else {
        read_new_passphrase("CUSTODIA_PASSPHRASE", "New passphrase: ")?
    };
    let session = Vault::new(store, config.kdf.clone())
        .unlock(user, &passphrase)
        .await
        .with_context(|| format!("unlocking profile '{user}'"))?;

    if existed {
        println!("unlocked profile '{}'", session.user_id());
    } else {
        println!("created profile '{}'", session.user_id());
        println!("  store: {}", store_path.display());
    }
    Ok(())
}

// ── `custodia rotate` ─────────────────────────────────────────────────────────

async fn cmd_rotate(config: &CustodiaConfig, store_path: &Path, user: &str) -> Result<()> {
    let session = open_session(config, store_path, user).await?;

    let new_pass = read_new_passphrase("CUSTODIA_NEW_PASSPHRASE", "New passphrase: ")?;

    session
        .rewrap(&new_pass)
        .await
        .context("re-wrapping master key")?;
    println!("passphrase changed for '{user}'");
    Ok(())
}

// ── `custodia encrypt` / `decrypt` ────────────────────────────────────────────

async fn cmd_encrypt(
    config: &CustodiaConfig,
    store_path: &Path,
    record: &RecordArgs,
    fields: Vec<(String, Value)>,
) -> Result<()> {
    let mut session = open_session(config, store_path, &record.user).await?;
    let values: Map<String, Value> = fields.into_iter().collect();

    let stored = session
        .store_fields(&record.scope, &record.table, &record.record, &values)
        .await
        .with_context(|| format!("encrypting {}/{}", record.table, record.record))?;

    println!(
        "stored {} field(s) for {}/{}",
        stored.len(),
        record.table,
        record.record
    );
    for name in stored.names() {
        println!("  {name}");
    }
    Ok(())
}

async fn cmd_decrypt(
    config: &CustodiaConfig,
    store_path: &Path,
    record: &RecordArgs,
    fields: &[String],
) -> Result<()> {
    let mut session = open_session(config, store_path, &record.user).await?;
    let names: Vec<&str> = fields.iter().map(String::as_str).collect();

    let decrypted = session
        .load_fields(&record.scope, &record.table, &record.record, &names)
        .await
        .with_context(|| format!("decrypting {}/{}", record.table, record.record))?;

    let out: Map<String, Value> = decrypted
        .into_iter()
        .map(|(name, value)| (name, value.unwrap_or(Value::Null)))
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&out).context("rendering output")?
    );
    Ok(())
}

// ── `custodia blind-index` ────────────────────────────────────────────────────

async fn cmd_blind_index(
    config: &CustodiaConfig,
    store_path: &Path,
    user: &str,
    scope: &str,
    value: &str,
) -> Result<()> {
    let mut session = open_session(config, store_path, user).await?;
    session
        .get_or_create_scope_keys(scope)
        .await
        .with_context(|| format!("loading keys for scope '{scope}'"))?;

    let token = session.compute_blind_index(scope, value)?;
    println!("{token}");
    Ok(())
}

// ── `custodia config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &CustodiaConfig, config_path: &Path) -> Result<()> {
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

// ── Utilities ─────────────────────────────────────────────────────────────────

/// Parse `field=value`. The value is JSON when it parses as JSON, else a string.
fn parse_assignment(arg: &str) -> Result<(String, Value), String> {
    let (field, raw) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected field=value, got '{arg}'"))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(format!("empty field name in '{arg}'"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((field.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("name=Bar Centrale").unwrap(),
            ("name".into(), Value::String("Bar Centrale".into()))
        );
        assert_eq!(
            parse_assignment("vat=12345").unwrap(),
            ("vat".into(), serde_json::json!(12345))
        );
        assert_eq!(
            parse_assignment("note=a=b").unwrap(),
            ("note".into(), Value::String("a=b".into()))
        );
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=x").is_err());
    }

    #[test]
    fn test_init_is_alias_for_unlock() {
        let cli = Cli::try_parse_from(["custodia", "init", "--user", "u1"]).unwrap();
        assert!(matches!(cli.command, Commands::Unlock { ref user } if user == "u1"));
    }

    #[test]
    fn test_expand_tilde() {
        let home = std::env::var("HOME").unwrap_or_default();
        assert_eq!(
            expand_tilde(Path::new("~/.local/share/custodia/store.json")),
            PathBuf::from(home).join(".local/share/custodia/store.json")
        );
        assert_eq!(expand_tilde(Path::new("/abs/path")), PathBuf::from("/abs/path"));
    }

    #[tokio::test]
    async fn test_load_config_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).await.unwrap();
        assert_eq!(config.kdf.iterations, 310_000);
    }

    #[tokio::test]
    async fn test_load_config_rejects_weak_kdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custodia.toml");
        tokio::fs::write(&path, "[kdf]\niterations = 1000\n").await.unwrap();

        assert!(load_config(&path).await.is_err());
    }

    #[test]
    fn test_new_passphrase_checks() {
        let pass = SecretString::from("correct horse");
        assert!(check_new_passphrase(&pass, None).is_ok());
        assert!(check_new_passphrase(&pass, Some(&SecretString::from("correct horse"))).is_ok());

        let err = check_new_passphrase(&pass, Some(&SecretString::from("correct hose"))).unwrap_err();
        assert!(err.to_string().contains("do not match"));

        let empty = SecretString::from("");
        assert!(check_new_passphrase(&empty, None).is_err());
        assert!(check_new_passphrase(&empty, Some(&SecretString::from(""))).is_err());
    }

    #[tokio::test]
    async fn test_session_commands_require_existing_profile() {
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("store.json");

        let Err(err) = open_session(&CustodiaConfig::default(), &store_path, "alice").await else {
            panic!("opened a session for a missing profile");
        };
        assert!(err.to_string().contains("custodia init"));

        // nothing was bootstrapped
        let store = JsonFileStore::open(&store_path).await.unwrap();
        assert!(store.get_profile_key_material("alice").await.unwrap().is_none());
    }
}
