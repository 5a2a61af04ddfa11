//! camp: campspot API command-line client
//!
//! Commands:
//!   call METHOD PATH [--data JSON] [-H name:value]  - encrypted API call
//!   call --plain ...                               - unencrypted call
//!   warmup                                         - pre-fetch the server key
//!   keepalive                                      - keep the credential fresh until Ctrl-C
//!   logout                                         - forget stored credentials
//!   config show                                    - display current configuration

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use camp_client::{
    ApiRequest, CallOutcome, Collaborators, HttpTransport, Notice, Notifier, Pipeline,
    PlatformLogin,
};
use camp_core::config::CampConfig;
use camp_core::types::Method;
use camp_core::{CampError, CampResult, SystemClock};
use camp_store::FileStore;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "camp",
    version,
    about = "campspot API client",
    long_about = "camp: call the campspot API through the encrypted, authenticated request pipeline"
)]
struct Cli {
    /// Path to camp.toml configuration file
    #[arg(long, short = 'c', env = "CAMP_CONFIG", default_value = "~/.config/camp/camp.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "CAMP_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "CAMP_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// One-time platform login code (prompted for when a login is needed)
    #[arg(long, env = "CAMP_LOGIN_CODE", hide_env_values = true)]
    login_code: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Issue an API call and print the decrypted response
    Call {
        /// HTTP method (GET, POST, PUT, DELETE, OPTIONS)
        method: Method,
        /// API path, e.g. /api/spots
        path: String,
        /// JSON request body
        #[arg(long, short = 'd')]
        data: Option<String>,
        /// Extra header as "name: value" (repeatable)
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,
        /// Skip the encrypted envelope and credentials
        #[arg(long)]
        plain: bool,
    },

    /// Fetch and cache the server public key
    Warmup,

    /// Renew the access credential periodically until interrupted
    Keepalive,

    /// Remove stored credentials
    Logout,

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
    let config_path = expand_tilde(&cli.config);
    let (config, found) = load_config(&config_path).await?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = match &cli.log_format {
        Some(format) => format.clone(),
        None if config.log.format.eq_ignore_ascii_case("json") => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(&level, &format);

    if !found {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            config_path.display()
        );
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "camp starting"
    );

    match cli.command {
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path, found),
        Commands::Call {
            method,
            path,
            data,
            headers,
            plain,
        } => {
            let request = build_request(method, &path, data.as_deref(), &headers)?;
            let pipeline = build_pipeline(&config, cli.login_code).await?;
            cmd_call(&pipeline, request, plain).await
        }
        Commands::Warmup => {
            let pipeline = build_pipeline(&config, cli.login_code).await?;
            pipeline.warm_up().await.context("key exchange")?;
            println!("server key cached");
            Ok(())
        }
        Commands::Keepalive => {
            let pipeline = build_pipeline(&config, cli.login_code).await?;
            cmd_keepalive(&pipeline).await
        }
        Commands::Logout => {
            let pipeline = build_pipeline(&config, cli.login_code).await?;
            cmd_logout(&pipeline).await
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

/// Load the config file; a missing file yields defaults and `false`.
async fn load_config(path: &Path) -> Result<(CampConfig, bool)> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((CampConfig::default(), false))
    }
}

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

// ── Platform glue ─────────────────────────────────────────────────────────────

/// Login codes from the command line, or typed in when none was given
struct ConsoleLogin {
    code: Option<SecretString>,
}

#[async_trait]
impl PlatformLogin for ConsoleLogin {
    async fn login(&self) -> CampResult<SecretString> {
        if let Some(code) = &self.code {
            return Ok(code.clone());
        }
        let typed = tokio::task::spawn_blocking(|| rpassword::prompt_password("Login code: "))
            .await
            .map_err(|e| CampError::Auth(format!("login prompt failed: {e}")))?
            .map_err(|e| CampError::Auth(format!("reading login code: {e}")))?;
        let typed = typed.trim().to_string();
        if typed.is_empty() {
            return Err(CampError::Auth("no login code entered".into()));
        }
        Ok(SecretString::from(typed))
    }
}

/// Prints notices to stderr
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        match notice {
            Notice::Api { code, msg } => eprintln!("[{code}] {msg}"),
            Notice::Fatal { message } => eprintln!("error: {message}"),
        }
    }
}

async fn build_pipeline(config: &CampConfig, login_code: Option<String>) -> Result<Pipeline> {
    config.validate()?;

    let store_path = expand_tilde(&config.store.path);
    let store = FileStore::open(&store_path)
        .await
        .with_context(|| format!("opening store: {}", store_path.display()))?;
    let transport = HttpTransport::new(Duration::from_secs(config.api.timeout_secs))?;

    let pipeline = Pipeline::new(
        config,
        Collaborators {
            transport: Arc::new(transport),
            login: Arc::new(ConsoleLogin {
                code: login_code.map(SecretString::from),
            }),
            store: Arc::new(store),
            clock: Arc::new(SystemClock),
            notifier: Arc::new(ConsoleNotifier),
        },
    )?;
    Ok(pipeline)
}

// ── `camp call` ───────────────────────────────────────────────────────────────

fn build_request(
    method: Method,
    path: &str,
    data: Option<&str>,
    headers: &[String],
) -> Result<ApiRequest> {
    let mut request = ApiRequest::new(method, path);
    if let Some(data) = data {
        let body: serde_json::Value =
            serde_json::from_str(data).context("--data is not valid JSON")?;
        request = request.with_body(body);
    }
    for header in headers {
        let (name, value) = parse_header(header)?;
        request = request.with_header(name, value);
    }
    Ok(request)
}

fn parse_header(raw: &str) -> Result<(&str, &str)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("header '{raw}' is not in 'name: value' form"))?;
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("header '{raw}' has an empty name");
    }
    Ok((name, value.trim()))
}

async fn cmd_call(pipeline: &Pipeline, request: ApiRequest, plain: bool) -> Result<()> {
    let outcome = if plain {
        pipeline.call_plain(request).await?
    } else {
        pipeline.call(request).await?
    };

    match outcome {
        CallOutcome::Completed(response) => {
            let rendered = serde_json::to_string_pretty(&response)
                .context("serializing response")?;
            println!("{rendered}");
        }
        CallOutcome::Superseded => println!("superseded"),
    }
    Ok(())
}

// ── `camp keepalive` ──────────────────────────────────────────────────────────

async fn cmd_keepalive(pipeline: &Pipeline) -> Result<()> {
    pipeline.warm_up().await.context("key exchange")?;

    let cancel = CancellationToken::new();
    let task = pipeline.spawn_keepalive(cancel.clone());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    cancel.cancel();
    task.await.context("keepalive task")?;
    Ok(())
}

// ── `camp logout` ─────────────────────────────────────────────────────────────

async fn cmd_logout(pipeline: &Pipeline) -> Result<()> {
    pipeline
        .credentials()
        .clear()
        .await
        .context("removing stored credentials")?;
    println!("logged out");
    Ok(())
}

// ── `camp config show` ────────────────────────────────────────────────────────

fn cmd_config_show(config: &CampConfig, config_path: &Path, found: bool) -> Result<()> {
    if found {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let mut shown = config.clone();
    if !shown.keys.app_key.is_empty() {
        shown.keys.app_key = "[REDACTED]".into();
    }
    let rendered = toml::to_string_pretty(&shown).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
