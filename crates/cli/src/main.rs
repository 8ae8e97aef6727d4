//! `nexus` entrypoint and subcommand orchestration.

mod config;
#[cfg(test)]
mod test_support;
mod view;

use std::str::FromStr;

use agent::ProviderPreset;
use clap::{Parser, Subcommand};
use config::Config;
use gateway::{InviteBundle, InviteCredential, InviteSummary, UnlockResult};
use proto::{ConfigError, is_valid_room};
use tracing::warn;

#[cfg(not(test))]
use std::sync::Arc;

#[cfg(not(test))]
use agent::OpenAiCompatibleQuery;
#[cfg(not(test))]
use anyhow::Context;
#[cfg(not(test))]
use channels::{ChatTransport, LoopbackTransport, MqttTransport};
#[cfg(not(test))]
use config::TransportKind;
#[cfg(not(test))]
use gateway::{
    CredentialStore, FileStore, InviteDecoder, KeyValueStore, MessageRouter, Session, SessionGate,
    SharedCredentials,
};
#[cfg(not(test))]
use proto::{ConnectionStatus, UserIdentity};
#[cfg(not(test))]
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
#[cfg(not(test))]
use tokio::sync::watch;
#[cfg(not(test))]
use tracing::info;
#[cfg(not(test))]
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};
#[cfg(not(test))]
use view::TerminalView;

/// Share links point here unless `--base-url` is given.
const DEFAULT_INVITE_BASE: &str = "http://localhost:5173/";

/// Top-level command-line arguments for the nexus client.
#[derive(Parser)]
#[command(name = "nexus")]
#[command(about = "Room chat over MQTT with an /ai relay", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Enable debug logging to ~/.nexus/logs/debug.log
    #[arg(long, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// CLI subcommands available in the application.
#[derive(Subcommand)]
enum Commands {
    /// Unlock and join the chat room (default when no subcommand is given)
    Chat {
        /// Invite link or bare invite token
        #[arg(long)]
        invite: Option<String>,

        /// Room to join instead of the configured one
        #[arg(long)]
        room: Option<String>,

        /// Do not connect to the broker; chat stays on this machine
        #[arg(long, default_value_t = false)]
        offline: bool,
    },

    /// Manage stored provider API keys
    Keys {
        #[command(subcommand)]
        command: KeysCommands,
    },

    /// Select the provider (and model) used by /ai
    Select {
        /// Provider id (groq, openai, openrouter, together, mistral, or a custom one)
        provider: String,

        /// Model id; defaults to the provider preset's model
        model: Option<String>,
    },

    /// Build invite links
    Invite {
        #[command(subcommand)]
        command: InviteCommands,
    },
}

/// `keys` sub-subcommands.
#[derive(Subcommand)]
enum KeysCommands {
    /// Store an API key for a provider
    Set {
        /// Provider id
        provider: String,
        /// API key
        key: String,
    },
    /// Show stored keys (masked) and the current selection
    List,
    /// Delete the key stored for a provider
    Remove {
        /// Provider id
        provider: String,
    },
}

/// `invite` sub-subcommands.
#[derive(Subcommand)]
enum InviteCommands {
    /// Print a share link carrying a key and/or a room
    Create {
        /// Provider id for the shared key
        #[arg(long)]
        provider: Option<String>,

        /// API key to share
        #[arg(long)]
        key: Option<String>,

        /// Model to select along with the key
        #[arg(long)]
        model: Option<String>,

        /// Room the invitee joins
        #[arg(long)]
        room: Option<String>,

        /// Page the link points at
        #[arg(long, default_value = DEFAULT_INVITE_BASE)]
        base_url: String,
    },
}

#[cfg(not(test))]
#[tokio::main]
/// Program entrypoint.
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Commands::Chat {
        invite: None,
        room: None,
        offline: false,
    });

    // Console logs default to warn so they do not interleave with the transcript.
    // --debug adds a daily-rotated file under ~/.nexus/logs.
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    // WorkerGuard must outlive main() so buffered file writes are flushed on exit.
    let _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>;

    if cli.debug {
        let log_dir = config::nexus_home().join("logs");
        std::fs::create_dir_all(&log_dir).ok();
        let appender = tracing_appender::rolling::daily(&log_dir, "debug.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        _file_guard = Some(guard);

        let console = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(console_filter);
        let file = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .with_filter(EnvFilter::new(
                "debug,rumqttc=info,hyper_util=info,rustls=info,reqwest=info",
            ));
        tracing_subscriber::registry()
            .with(console)
            .with(file)
            .init();
    } else {
        _file_guard = None;
        fmt()
            .with_env_filter(console_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    if cli.debug {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            command = command_label(&command),
            log_level = %cli.log_level,
            "========== nexus session start =========="
        );
    }

    let config = config_for(&command, Config::load(cli.config.as_deref()))?;

    match command {
        Commands::Chat {
            invite,
            room,
            offline,
        } => cmd_chat(config, invite, room, offline).await,
        Commands::Keys { command } => match command {
            KeysCommands::Set { provider, key } => cmd_keys_set(config, provider, key).await,
            KeysCommands::List => cmd_keys_list(config).await,
            KeysCommands::Remove { provider } => cmd_keys_remove(config, provider).await,
        },
        Commands::Select { provider, model } => cmd_select(config, provider, model).await,
        Commands::Invite { command } => match command {
            InviteCommands::Create {
                provider,
                key,
                model,
                room,
                base_url,
            } => cmd_invite_create(provider, key, model, room, base_url),
        },
    }
}

/// Picks the config a command runs with.
///
/// Commands behind the passphrase gate refuse to start on a config that failed
/// to load; only `invite create` falls back to defaults.
fn config_for(command: &Commands, loaded: Result<Config, ConfigError>) -> anyhow::Result<Config> {
    match loaded {
        Ok(config) => Ok(config),
        Err(e) if matches!(command, Commands::Invite { .. }) => {
            warn!("Failed to load config ({e}), using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(anyhow::Error::new(e).context("failed to load config")),
    }
}

/// `--room` if given, else the configured room.
fn resolve_room(arg: Option<String>, configured: &str) -> anyhow::Result<String> {
    match arg.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()) {
        Some(room) if is_valid_room(&room) => Ok(room),
        Some(room) => anyhow::bail!(
            "invalid room '{room}': must not contain '/', '+', '#' or control characters"
        ),
        None => Ok(configured.to_string()),
    }
}

/// Short command name for the session-start log marker.
fn command_label(command: &Commands) -> &'static str {
    match command {
        Commands::Chat { .. } => "chat",
        Commands::Keys { .. } => "keys",
        Commands::Select { .. } => "select",
        Commands::Invite { .. } => "invite",
    }
}

#[cfg(not(test))]
type StdinLines = Lines<BufReader<Stdin>>;

#[cfg(not(test))]
/// Opens the credential store configured for this process.
fn open_credentials(config: &Config) -> SharedCredentials {
    let path = config.storage.resolved_path();
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(path));
    CredentialStore::load_with_defaults(store, config.ai.default_bundle()).into_shared()
}

#[cfg(not(test))]
/// Prompts for the passphrase until the gate opens. `Ok(None)` on end of input.
async fn unlock_interactive(
    gate: &SessionGate,
    lines: &mut StdinLines,
) -> anyhow::Result<Option<UnlockResult>> {
    loop {
        print_prompt("🔒 passphrase: ");
        let Some(line) = lines.next_line().await.context("failed to read stdin")? else {
            return Ok(None);
        };
        let result = gate.attempt_unlock(line.trim_end_matches(['\r', '\n']));
        println!("{}", describe_unlock(&result));
        if result.is_unlocked() {
            return Ok(Some(result));
        }
    }
}

#[cfg(not(test))]
/// Builds a gate for admin commands and unlocks it interactively.
async fn admin_gate(config: &Config) -> anyhow::Result<Option<SessionGate>> {
    let session = Session::new(config.user.identity(), config.user.room.clone());
    let gate = SessionGate::new(&config.gate.passphrase, session, open_credentials(config))
        .with_policy(config.gate.attempt_policy());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    match unlock_interactive(&gate, &mut lines).await? {
        Some(_) => Ok(Some(gate)),
        None => Ok(None),
    }
}

#[cfg(not(test))]
fn print_prompt(prompt: &str) {
    use std::io::Write;
    print!("{prompt}");
    let _ = std::io::stdout().flush();
}

#[cfg(not(test))]
/// Unlocks, connects the transport and runs the chat REPL.
async fn cmd_chat(
    config: Config,
    invite: Option<String>,
    room: Option<String>,
    offline: bool,
) -> anyhow::Result<()> {
    let invite = invite
        .or_else(|| config.invite.clone())
        .and_then(|arg| InviteDecoder::from_argument(&arg));
    if invite.is_some() {
        println!("✉️  Invite detected; it is applied after unlock.");
    }

    let room = resolve_room(room, &config.user.room)?;
    let session = Session::new(config.user.identity(), room).with_invite(invite);
    let gate = Arc::new(
        SessionGate::new(&config.gate.passphrase, session, open_credentials(&config))
            .with_policy(config.gate.attempt_policy()),
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    if unlock_interactive(&gate, &mut lines).await?.is_none() {
        return Ok(());
    }

    let identity = gate.user();
    let room = gate.room();
    let view = Arc::new(TerminalView::stdout());

    let use_loopback = offline || config.transport.kind == TransportKind::Loopback;
    let (transport, mut inbound, mut status_rx, mqtt) = if use_loopback {
        let (transport, inbound) = LoopbackTransport::new();
        let transport: Arc<dyn ChatTransport> = Arc::new(transport);
        (transport, inbound, None, None)
    } else {
        let (mqtt, inbound) =
            MqttTransport::connect(config.transport.mqtt_settings(), identity.clone(), &room);
        let mqtt = Arc::new(mqtt);
        let status = mqtt.status_watch();
        let transport: Arc<dyn ChatTransport> = mqtt.clone();
        (transport, inbound, Some(status), Some(mqtt))
    };

    let ai = config
        .ai
        .base_urls
        .iter()
        .fold(OpenAiCompatibleQuery::new(), |query, (provider, url)| {
            query.with_base_url(provider, url)
        });
    let router = MessageRouter::new(gate.clone(), transport, Arc::new(ai), view.clone());

    view.notice(&welcome_banner(&identity, &room, use_loopback));
    info!(%room, offline = use_loopback, "Chat session started");

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if is_quit_command(line.trim()) {
                        break;
                    }
                    // AI replies finish on their own task; the handle is not needed here.
                    let _ = router.submit(&line);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("stdin closed: {e}");
                    break;
                }
            },
            Some(message) = inbound.recv() => {
                router.deliver(&message);
            }
            Some(status) = next_status(&mut status_rx) => {
                view.status_changed(status);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if let Some(mqtt) = mqtt {
        mqtt.shutdown();
    }
    info!("Chat session ended");
    println!("👋 bye");
    Ok(())
}

#[cfg(not(test))]
/// Resolves with the next status change; never resolves without a watch.
async fn next_status(
    rx: &mut Option<watch::Receiver<ConnectionStatus>>,
) -> Option<ConnectionStatus> {
    let Some(watch) = rx.as_mut() else {
        return std::future::pending().await;
    };
    if watch.changed().await.is_err() {
        *rx = None;
        return std::future::pending().await;
    }
    let status = *watch.borrow_and_update();
    Some(status)
}

#[cfg(not(test))]
fn welcome_banner(identity: &UserIdentity, room: &str, offline: bool) -> String {
    let mode = if offline { "offline" } else { "connecting…" };
    format!(
        "{} {} in #{room} ({mode}). Type /ai <prompt> to ask the model, /quit to leave.",
        identity.avatar, identity.display_name
    )
}

#[cfg(not(test))]
/// Stores a provider key.
async fn cmd_keys_set(config: Config, provider: String, key: String) -> anyhow::Result<()> {
    let Some(gate) = admin_gate(&config).await? else {
        return Ok(());
    };
    let masked = proto::mask_secret(&key);
    gate.credentials()
        .lock()
        .set_key(&provider, &key)
        .context("failed to save key")?;
    println!("Stored key for '{provider}' ({masked}).");
    Ok(())
}

#[cfg(not(test))]
/// Lists stored keys (masked) and the active selection.
async fn cmd_keys_list(config: Config) -> anyhow::Result<()> {
    let Some(gate) = admin_gate(&config).await? else {
        return Ok(());
    };
    let creds = gate.credentials();
    let creds = creds.lock();
    for line in format_key_listing(creds.bundle()) {
        println!("{line}");
    }
    Ok(())
}

#[cfg(not(test))]
/// Deletes a provider key.
async fn cmd_keys_remove(config: Config, provider: String) -> anyhow::Result<()> {
    let Some(gate) = admin_gate(&config).await? else {
        return Ok(());
    };
    let removed = gate
        .credentials()
        .lock()
        .remove_key(&provider)
        .context("failed to save credentials")?;
    if removed {
        println!("Removed key for '{provider}'.");
    } else {
        println!("No key stored for '{provider}'.");
    }
    Ok(())
}

#[cfg(not(test))]
/// Changes the provider/model used by /ai.
async fn cmd_select(config: Config, provider: String, model: Option<String>) -> anyhow::Result<()> {
    let Some(gate) = admin_gate(&config).await? else {
        return Ok(());
    };
    let creds = gate.credentials();
    let mut creds = creds.lock();
    let model = resolve_model(&provider, model).with_context(|| {
        format!(
            "'{provider}' is not a built-in provider ({}); pass a model id",
            agent::preset_names()
        )
    })?;
    creds
        .set_selection(&provider, &model)
        .context("failed to save selection")?;
    println!("Selected {provider} / {model}.");
    if !creds.has_usable_key(&provider) {
        println!("No key stored for '{provider}' yet. Run `nexus keys set {provider} <key>`.");
    }
    Ok(())
}

#[cfg(not(test))]
/// Prints a share link.
fn cmd_invite_create(
    provider: Option<String>,
    key: Option<String>,
    model: Option<String>,
    room: Option<String>,
    base_url: String,
) -> anyhow::Result<()> {
    let bundle = build_invite(provider, key, model, room)?;
    println!("{}", gateway::invite_url(&base_url, &bundle));
    if bundle.credential.is_some() {
        println!("⚠️  Anyone with this link can use the shared key.");
    }
    Ok(())
}

/// Returns true when input requests REPL termination.
fn is_quit_command(line: &str) -> bool {
    line == "/quit" || line == "/exit"
}

/// Explicit model, else the preset default for a known provider.
fn resolve_model(provider: &str, model: Option<String>) -> Option<String> {
    model
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .or_else(|| {
            ProviderPreset::from_str(provider)
                .ok()
                .map(|preset| preset.default_model().to_string())
        })
}

/// Validates `invite create` flags into a bundle.
fn build_invite(
    provider: Option<String>,
    key: Option<String>,
    model: Option<String>,
    room: Option<String>,
) -> anyhow::Result<InviteBundle> {
    let credential = match (provider, key) {
        (Some(provider), Some(key)) => Some(InviteCredential {
            provider,
            key,
            model,
        }),
        (None, None) => None,
        _ => anyhow::bail!("--provider and --key must be given together"),
    };
    let room = room
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    if let Some(room) = &room
        && !is_valid_room(room)
    {
        anyhow::bail!(
            "invalid room '{room}': must not contain '/', '+', '#' or control characters"
        );
    }
    let bundle = InviteBundle {
        credential,
        room_override: room,
    };
    if bundle.is_empty() {
        anyhow::bail!("nothing to share: pass --provider/--key and/or --room");
    }
    Ok(bundle)
}

/// Human-readable outcome of an unlock attempt.
fn describe_unlock(result: &UnlockResult) -> String {
    match result {
        UnlockResult::Unlocked { invite: None } => "🔓 Access granted.".to_string(),
        UnlockResult::Unlocked {
            invite: Some(summary),
        } => format!("🔓 Access granted. {}", describe_invite(summary)),
        UnlockResult::Mismatch => "⛔ Access denied.".to_string(),
        UnlockResult::Throttled { retry_after } => format!(
            "⏱  Too many attempts. Try again in {}s.",
            retry_after.as_secs().max(1)
        ),
    }
}

fn describe_invite(summary: &InviteSummary) -> String {
    let mut parts = Vec::new();
    if let (Some(provider), Some(model)) = (&summary.provider, &summary.model) {
        parts.push(format!("Invite key stored for {provider} ({model})."));
    }
    if let Some(room) = &summary.room {
        parts.push(format!("Joining #{room}."));
    }
    parts.join(" ")
}

/// Lines printed by `nexus keys list`.
fn format_key_listing(bundle: &gateway::CredentialBundle) -> Vec<String> {
    let mut lines = Vec::new();
    if bundle.keys_by_provider.is_empty() {
        lines.push("No stored keys. Run `nexus keys set <provider> <key>`.".to_string());
    } else {
        lines.push(format!("Stored keys ({}):", bundle.keys_by_provider.len()));
        for (provider, key) in &bundle.keys_by_provider {
            let marker = if *provider == bundle.selected_provider {
                " *"
            } else {
                ""
            };
            lines.push(format!("  {provider}: {}{marker}", proto::mask_secret(key)));
        }
    }
    lines.push(format!(
        "Selected: {} / {}",
        bundle.selected_provider, bundle.selected_model
    ));
    lines
}
