//! relaycrypt: end-to-end encrypted file transfer through an untrusted relay
//!
//! Commands:
//!   send <link> <paths...>      - encrypt and upload files or directory trees
//!   receive <link> [--out DIR]  - download, decrypt and write a batch
//!   health [<url>]              - probe a relay's /health endpoint
//!   config show                 - print the effective configuration
//!
//! A link is `https://relay/{receive|send}/<token>#key=<base64url>`. With
//! `[relay] base_url` set, a bare `<token>#key=...` is accepted as well.

mod progress;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relaycrypt_core::config::{RelaycryptConfig, TransferSettings};
use relaycrypt_core::path::resolve_under;
use relaycrypt_crypto::{CredentialProvider, EnvCredentials, SessionKey};
use relaycrypt_relay::{build_client, check_health, check_relay_url};
use relaycrypt_transfer::{
    collect_files, DownloadOrchestrator, LinkDirection, MemoryPressureHandler, ProceedOnPressure,
    RefuseOnPressure, SinkOutput, StaticProbe, TransferLink, TransferSession, UploadOrchestrator,
};

use progress::ProgressView;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "relaycrypt",
    version,
    about = "End-to-end encrypted file transfer through a relay"
)]
struct Cli {
    /// Path to relaycrypt.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "RELAYCRYPT_CONFIG",
        default_value = "relaycrypt.toml",
        global = true
    )]
    config: PathBuf,

    /// Transfer profile (overrides chunk size and chunk concurrency)
    #[arg(long, global = true)]
    profile: Option<Profile>,

    /// Log level (trace, debug, info, warn, error); defaults to [log] level
    #[arg(long, env = "RELAYCRYPT_LOG", global = true)]
    log: Option<String>,

    /// Log format (json, text); defaults to [log] format
    #[arg(long, env = "RELAYCRYPT_LOG_FORMAT", global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt and upload files or directory trees
    ///
    /// Without a key in the link or RELAYCRYPT_KEY, a fresh key is generated
    /// and printed for the receiver.
    Send {
        /// Upload link (.../receive/<token>[#key=...])
        link: String,
        /// Files or directories; directories keep their relative layout
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Download and decrypt every file offered by a link
    Receive {
        /// Download link (.../send/<token>#key=...)
        link: String,
        /// Output directory
        #[arg(long, short = 'o', default_value = ".")]
        out: PathBuf,
        /// Buffer large files in memory even when memory looks tight
        #[arg(long)]
        allow_large_memory: bool,
    },

    /// Check that a relay is reachable
    Health {
        /// Relay base URL (default: [relay] base_url)
        url: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (defaults + config file + profile)
    Show,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum Profile {
    /// Direct connection: 10 MiB chunks, 8 in flight
    Local,
    /// Tunnelled relay: 1 MiB chunks, 2 in flight
    Tunnel,
}

impl Profile {
    fn apply(self, transfer: &mut TransferSettings) {
        let preset = match self {
            Self::Local => TransferSettings::local(),
            Self::Tunnel => TransferSettings::tunnel(),
        };
        transfer.chunk_size = preset.chunk_size;
        transfer.max_concurrent_chunks = preset.max_concurrent_chunks;
    }
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
    let (mut config, from_file) = load_config(&cli.config).await?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = match cli.log_format.clone() {
        Some(format) => format,
        None => LogFormat::from_str(&config.log.format, true)
            .map_err(|e| anyhow::anyhow!("invalid [log] format: {e}"))?,
    };
    init_logging(&level, &format);

    if !from_file {
        debug!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }
    if let Some(profile) = cli.profile {
        profile.apply(&mut config.transfer);
    }
    config.validate().context("invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        profile = ?cli.profile,
        chunk_size = config.transfer.chunk_size,
        "relaycrypt starting"
    );

    match cli.command {
        Commands::Send { link, paths } => cmd_send(&config, &link, &paths).await,
        Commands::Receive {
            link,
            out,
            allow_large_memory,
        } => cmd_receive(&config, &link, &out, allow_large_memory).await,
        Commands::Health { url } => cmd_health(&config, url).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config, from_file),
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<(RelaycryptConfig, bool)> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((RelaycryptConfig::default(), false))
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

// ── Links and sessions ────────────────────────────────────────────────────────

/// Parse a full link, or expand a bare token against `[relay] base_url`.
fn resolve_link(
    config: &RelaycryptConfig,
    raw: &str,
    direction: LinkDirection,
) -> Result<TransferLink> {
    let full = if raw.contains("://") {
        raw.to_string()
    } else {
        let base = config.relay.base_url.as_deref().with_context(|| {
            format!("'{raw}' is not a link and [relay] base_url is not set")
        })?;
        let segment = match direction {
            LinkDirection::Upload => "receive",
            LinkDirection::Download => "send",
        };
        format!("{}/{segment}/{raw}", base.trim_end_matches('/'))
    };

    let link = TransferLink::parse(&full)?;
    if link.direction() != direction {
        let expected = match direction {
            LinkDirection::Upload => "an upload link (.../receive/<token>)",
            LinkDirection::Download => "a download link (.../send/<token>)",
        };
        bail!("expected {expected}");
    }
    Ok(link)
}

/// Key from the link fragment, then RELAYCRYPT_KEY, then (when allowed) a
/// freshly generated one. The flag reports whether the key was generated.
fn open_session(link: &TransferLink, allow_generate: bool) -> Result<(TransferSession, bool)> {
    if link.credentials().is_some() {
        return Ok((TransferSession::from_link(link, None)?, false));
    }
    if std::env::var_os(EnvCredentials::DEFAULT_VAR).is_some() {
        let env = EnvCredentials::default();
        let provider: &dyn CredentialProvider = &env;
        return Ok((TransferSession::from_link(link, Some(provider))?, false));
    }
    if allow_generate {
        let session = TransferSession::new(link.token(), SessionKey::generate());
        return Ok((session, true));
    }
    bail!(
        "no key: the link has no #key= fragment and {} is not set",
        EnvCredentials::DEFAULT_VAR
    )
}

fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling transfer");
            token.cancel();
        }
    });
}

// ── `relaycrypt send` ─────────────────────────────────────────────────────────

async fn cmd_send(config: &RelaycryptConfig, raw_link: &str, paths: &[PathBuf]) -> Result<()> {
    let link = resolve_link(config, raw_link, LinkDirection::Upload)?;

    let mut files = Vec::new();
    for path in paths {
        files.extend(
            collect_files(path).with_context(|| format!("reading {}", path.display()))?,
        );
    }
    if files.is_empty() {
        bail!("nothing to send: no regular files under the given paths");
    }

    let (session, generated) = open_session(&link, true)?;
    let base = check_relay_url(link.base().as_str(), config.relay.enforce_tls)?;
    let client = build_client(&config.relay)?;
    let orchestrator = UploadOrchestrator::new(
        session.http_relay(client, base),
        &session,
        config.transfer.clone(),
    );
    cancel_on_ctrl_c(orchestrator.cancellation_token());

    println!("Sending {} file(s) via {}", files.len(), link.base());
    let view = ProgressView::spawn(orchestrator.progress(), "send")?;
    let result = orchestrator.start_upload(&files).await;
    view.finish().await;
    let report = result.context("upload failed")?;

    println!();
    println!("Upload complete:");
    println!("  files:   {}", report.files);
    println!("  chunks:  {}", report.chunks);
    println!("  bytes:   {}", fmt_bytes(report.bytes));
    if generated {
        println!();
        println!("Give the receiver this key (append it to their link):");
        println!("  #key={}", session.key().to_base64url());
    }
    Ok(())
}

// ── `relaycrypt receive` ──────────────────────────────────────────────────────

async fn cmd_receive(
    config: &RelaycryptConfig,
    raw_link: &str,
    out: &Path,
    allow_large_memory: bool,
) -> Result<()> {
    let link = resolve_link(config, raw_link, LinkDirection::Download)?;
    let (session, _) = open_session(&link, false)?;
    let base = check_relay_url(link.base().as_str(), config.relay.enforce_tls)?;
    let client = build_client(&config.relay)?;

    tokio::fs::create_dir_all(out)
        .await
        .with_context(|| format!("creating output directory {}", out.display()))?;

    let pressure: Arc<dyn MemoryPressureHandler> = if allow_large_memory {
        Arc::new(ProceedOnPressure)
    } else {
        Arc::new(RefuseOnPressure)
    };
    let orchestrator = DownloadOrchestrator::new(
        session.http_relay(client, base),
        &session,
        config.transfer.clone(),
    )
    .with_probe(Arc::new(StaticProbe::from_config(&config.environment)))
    .with_pressure_handler(pressure)
    .with_output_dir(out);
    cancel_on_ctrl_c(orchestrator.cancellation_token());

    let manifest = orchestrator
        .fetch_manifest()
        .await
        .context("fetching manifest")?;
    println!(
        "Receiving {} file(s) into {}",
        manifest.files.len(),
        out.display()
    );

    let view = ProgressView::spawn(orchestrator.progress(), "receive")?;
    let result = orchestrator.start_download(&manifest).await;
    view.finish().await;
    let files = result.context("download failed")?;

    println!();
    let mut total = 0;
    for file in &files {
        let path = match &file.output {
            SinkOutput::File(path) => path.clone(),
            SinkOutput::Memory(bytes) => write_output(out, &file.name, bytes).await?,
        };
        total += file.size;
        println!("  {}  ({})", path.display(), fmt_bytes(file.size));
    }
    println!(
        "Download complete: {} file(s), {}",
        files.len(),
        fmt_bytes(total)
    );
    Ok(())
}

/// Persist a file that was buffered in memory.
async fn write_output(out: &Path, name: &str, data: &[u8]) -> Result<PathBuf> {
    let dest = resolve_under(out, name)?;
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    tokio::fs::write(&dest, data)
        .await
        .with_context(|| format!("writing {}", dest.display()))?;
    Ok(dest)
}

// ── `relaycrypt health` ───────────────────────────────────────────────────────

async fn cmd_health(config: &RelaycryptConfig, url: Option<String>) -> Result<()> {
    let mut raw = url
        .or_else(|| config.relay.base_url.clone())
        .context("no relay URL given and [relay] base_url is not set")?;
    // keep a path prefix when joining /health
    if !raw.ends_with('/') {
        raw.push('/');
    }
    let base = check_relay_url(&raw, config.relay.enforce_tls)?;
    let client = build_client(&config.relay)?;
    check_health(&client, &base)
        .await
        .with_context(|| format!("relay {base} is not healthy"))?;
    println!("relay {base}: ok");
    Ok(())
}

// ── `relaycrypt config show` ──────────────────────────────────────────────────

fn cmd_config_show(config: &RelaycryptConfig, config_path: &Path, from_file: bool) -> Result<()> {
    if from_file {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            config_path.display()
        );
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_receive_with_global_flags() {
        let cli = Cli::try_parse_from([
            "relaycrypt",
            "receive",
            "https://relay.example/send/tok#key=abc",
            "--out",
            "downloads",
            "--profile",
            "tunnel",
        ])
        .unwrap();
        assert_eq!(cli.profile, Some(Profile::Tunnel));
        match cli.command {
            Commands::Receive {
                out,
                allow_large_memory,
                ..
            } => {
                assert_eq!(out, PathBuf::from("downloads"));
                assert!(!allow_large_memory);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn send_requires_paths() {
        assert!(Cli::try_parse_from(["relaycrypt", "send", "https://r/receive/t"]).is_err());
    }

    #[test]
    fn profile_overrides_only_chunking() {
        let mut transfer = TransferSettings {
            max_attempts: 7,
            ..TransferSettings::local()
        };
        Profile::Tunnel.apply(&mut transfer);
        assert_eq!(transfer.chunk_size, TransferSettings::tunnel().chunk_size);
        assert_eq!(transfer.max_concurrent_chunks, 2);
        assert_eq!(transfer.max_attempts, 7);
    }

    #[test]
    fn bare_token_uses_configured_relay() {
        let mut config = RelaycryptConfig::default();
        assert!(resolve_link(&config, "tok", LinkDirection::Download).is_err());

        config.relay.base_url = Some("https://relay.example/api/".into());
        let link = resolve_link(&config, "tok#key=abc", LinkDirection::Download).unwrap();
        assert_eq!(link.base().as_str(), "https://relay.example/api/");
        assert_eq!(link.token(), "tok");
        assert_eq!(link.direction(), LinkDirection::Download);
    }

    #[test]
    fn direction_mismatch_is_rejected() {
        let config = RelaycryptConfig::default();
        let err = resolve_link(
            &config,
            "https://relay.example/send/tok",
            LinkDirection::Upload,
        )
        .unwrap_err();
        assert!(err.to_string().contains("upload link"));
    }

    #[test]
    fn fmt_bytes_units() {
        assert_eq!(fmt_bytes(512), "512 B");
        assert_eq!(fmt_bytes(1536), "1.5 KB");
        assert_eq!(fmt_bytes(10 * 1024 * 1024), "10.0 MB");
    }

    #[tokio::test]
    async fn write_output_creates_parents_and_rejects_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let dest = write_output(dir.path(), "nested/a.txt", b"hello")
            .await
            .unwrap();
        assert_eq!(dest, dir.path().join("nested").join("a.txt"));
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");

        assert!(write_output(dir.path(), "../escape.txt", b"x").await.is_err());
    }
}
