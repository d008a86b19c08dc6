// apn: push notification sender CLI
//
// Loads configuration and the push certificate, then drives apn-core:
// single sends, multi-worker batches, offline encoding and config management.

mod config;
mod logging;

use anyhow::{Context, Result};
use apn_core::notification::{decode_frame, decode_simple, MAX_ALERT_LENGTH};
use apn_core::{
    ChannelKind, ContextId, Credentials, DeliveryManager, DeliveryOutcome, Format, Message,
    Notification, PushConfig, Style,
};
use clap::{Args, Parser, Subcommand};
use colored::*;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

#[derive(Parser)]
#[command(name = "apn")]
#[command(about = "Binary-protocol push notification sender", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to <config dir>/apn/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write JSON logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one notification
    Send {
        /// Hex device token (spaces and angle brackets are ignored)
        token: String,
        #[command(flatten)]
        message: MessageArgs,
        #[command(flatten)]
        style: StyleArgs,
        #[command(flatten)]
        delivery: DeliveryArgs,
    },
    /// Send every line of a JSON Lines file: {"token": "..", "message": {..}}
    Batch {
        file: PathBuf,
        /// Worker threads, each with its own connections
        #[arg(short, long, default_value = "4")]
        workers: usize,
        #[command(flatten)]
        style: StyleArgs,
        #[command(flatten)]
        delivery: DeliveryArgs,
    },
    /// Print the wire bytes of a notification as hex, without sending
    Encode {
        token: String,
        #[command(flatten)]
        message: MessageArgs,
        #[command(flatten)]
        style: StyleArgs,
        /// Decode the bytes again and print the fields
        #[arg(long)]
        verify: bool,
    },
    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default config file
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct MessageArgs {
    #[arg(short, long)]
    alert: Option<String>,
    #[arg(short, long)]
    badge: Option<u32>,
    /// Sound name; "true" plays the default sound
    #[arg(short, long)]
    sound: Option<String>,
    #[arg(long)]
    content_available: bool,
    /// JSON object merged into the payload root
    #[arg(long)]
    custom: Option<String>,
    /// Complete message as JSON (object, or a string for an alert)
    #[arg(long, conflicts_with_all = ["alert", "badge", "sound", "content_available", "custom"])]
    json: Option<String>,
}

#[derive(Args)]
struct StyleArgs {
    /// simple or frame
    #[arg(long, default_value = "frame")]
    format: Format,
    /// Four bytes as eight hex digits
    #[arg(long)]
    identifier: Option<String>,
    /// RFC 3339 timestamp or unix seconds
    #[arg(long)]
    expiry: Option<String>,
    #[arg(long)]
    priority: Option<u8>,
    /// Wait for an error response after each send
    #[arg(long)]
    debug: bool,
    /// Check one in N sends for an error response
    #[arg(long)]
    debug_sample: Option<u32>,
}

#[derive(Args)]
struct DeliveryArgs {
    /// production, sandbox or restricted
    #[arg(short, long, default_value = "production")]
    channel: ChannelKind,
    /// PEM file with the push certificate and private key
    #[arg(long)]
    cert: Option<PathBuf>,
    /// Extra CA certificates to trust
    #[arg(long)]
    ca: Option<PathBuf>,
}

#[derive(Deserialize)]
struct BatchLine {
    token: String,
    message: Value,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init("info", cli.log_dir.as_deref())?;

    let config_path = config::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Send {
            token,
            message,
            style,
            delivery,
        } => cmd_send(&config_path, &token, message, style, delivery),
        Commands::Batch {
            file,
            workers,
            style,
            delivery,
        } => cmd_batch(&config_path, &file, workers, style, delivery),
        Commands::Encode {
            token,
            message,
            style,
            verify,
        } => cmd_encode(&token, message, style, verify),
        Commands::Config { action } => cmd_config(&config_path, action),
    }
}

fn cmd_send(
    config_path: &Path,
    token: &str,
    message: MessageArgs,
    style: StyleArgs,
    delivery: DeliveryArgs,
) -> Result<()> {
    let config = config::load(config_path)?;
    let message = message.into_message()?;
    warn_long_alert(&message);
    let style = style.into_style(&config)?;
    let manager = build_manager(&config, &delivery)?;

    let outcome = manager.send(ContextId::next(), token, &message, delivery.channel, &style);
    manager.shutdown();

    match outcome.context("Failed to send notification")? {
        DeliveryOutcome::Sent => {
            println!("{} Sent to {} via {}", "✓".green(), token.bright_cyan(), delivery.channel);
            Ok(())
        }
        DeliveryOutcome::Rejected(response) => {
            println!("{} Rejected: {}", "✗".red(), response.to_string().bright_red());
            anyhow::bail!("Gateway rejected notification");
        }
    }
}

fn cmd_batch(
    config_path: &Path,
    file: &Path,
    workers: usize,
    style: StyleArgs,
    delivery: DeliveryArgs,
) -> Result<()> {
    let config = config::load(config_path)?;
    let style = style.into_style(&config)?;

    let contents = fs::read_to_string(file)
        .with_context(|| format!("Failed to read batch file {}", file.display()))?;
    let mut jobs = Vec::new();
    for (n, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: BatchLine = serde_json::from_str(line).with_context(|| {
            format!("Line {}: expected {{\"token\": .., \"message\": ..}}", n + 1)
        })?;
        let message = Message::try_from(entry.message).with_context(|| format!("Line {}", n + 1))?;
        jobs.push((entry.token, message));
    }

    let manager = build_manager(&config, &delivery)?;
    let workers = workers.clamp(1, jobs.len().max(1));

    println!(
        "{} {} notifications, {} workers, {} channel",
        "Sending".bold(),
        jobs.len(),
        workers,
        delivery.channel
    );

    let next = AtomicUsize::new(0);
    let sent = AtomicUsize::new(0);
    let rejected = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| {
                let context = ContextId::next();
                loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some((token, message)) = jobs.get(i) else {
                        break;
                    };
                    match manager.send(context, token, message, delivery.channel, &style) {
                        Ok(DeliveryOutcome::Sent) => {
                            sent.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(DeliveryOutcome::Rejected(response)) => {
                            rejected.fetch_add(1, Ordering::Relaxed);
                            eprintln!("  {} {}: {}", "✗".red(), token, response);
                        }
                        Err(e) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                            eprintln!("  {} {}: {}", "✗".red(), token, e);
                        }
                    }
                }
            });
        }
    });
    manager.shutdown();

    println!();
    println!("  {} {}", "Sent:    ".bold(), sent.load(Ordering::Relaxed).to_string().green());
    println!("  {} {}", "Rejected:".bold(), rejected.load(Ordering::Relaxed).to_string().yellow());
    println!("  {} {}", "Failed:  ".bold(), failed.load(Ordering::Relaxed).to_string().red());

    let failures = rejected.load(Ordering::Relaxed) + failed.load(Ordering::Relaxed);
    if failures > 0 {
        anyhow::bail!("{} of {} notifications were not delivered", failures, jobs.len());
    }
    Ok(())
}

fn cmd_encode(token: &str, message: MessageArgs, style: StyleArgs, verify: bool) -> Result<()> {
    let message = message.into_message()?;
    warn_long_alert(&message);
    let style = style.into_style(&PushConfig::default())?;
    let notification = Notification::new(token, &message, &style)?;
    let bytes = notification.encode();

    println!("{}", hex::encode(&bytes));

    if verify {
        let decoded = match notification.format() {
            Format::Simple => decode_simple(&bytes)?,
            Format::Frame => decode_frame(&bytes)?,
        };
        println!();
        println!("{}", "Decoded".bold());
        println!("  Command:    {}", decoded.command);
        println!("  Token:      {}", hex::encode(&decoded.token).bright_cyan());
        println!("  Payload:    {}", decoded.payload_json()?.to_string().bright_yellow());
        if let Some(identifier) = decoded.identifier {
            println!("  Identifier: {}", hex::encode(identifier));
        }
        if let Some(expiry) = decoded.expiry {
            println!("  Expiry:     {} ({})", expiry, format_timestamp(expiry));
        }
        if let Some(priority) = decoded.priority {
            println!("  Priority:   {}", priority);
        }
        println!("  Size:       {} bytes", bytes.len());
    }

    Ok(())
}

fn cmd_config(config_path: &Path, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = config::load(config_path)?;
            println!(
                "{} {}",
                "Config file:".bold(),
                config_path.display().to_string().bright_cyan()
            );
            if !config_path.exists() {
                println!("  {}", "(not found, showing defaults)".dimmed());
            }
            println!();
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Init { force } => {
            config::init(config_path, force)?;
            println!(
                "{} Wrote default config to {}",
                "✓".green(),
                config_path.display().to_string().bright_cyan()
            );
            println!();
            println!("{}", "Next steps:".bold());
            println!(
                "  • Set {} to your push certificate PEM",
                "certificate_path".bright_green()
            );
            println!("  • Send:   {}", "apn send <token> --alert Hello".bright_green());
        }
    }
    Ok(())
}

fn build_manager(config: &PushConfig, delivery: &DeliveryArgs) -> Result<DeliveryManager> {
    let cert_path = delivery
        .cert
        .as_ref()
        .or(config.certificate_path.as_ref())
        .context("No push certificate configured (use --cert or set certificate_path)")?;
    let pem = fs::read(cert_path)
        .with_context(|| format!("Failed to read certificate {}", cert_path.display()))?;

    let credentials = match delivery.ca.as_ref().or(config.ca_path.as_ref()) {
        Some(ca_path) => {
            let ca = fs::read(ca_path)
                .with_context(|| format!("Failed to read CA file {}", ca_path.display()))?;
            Credentials::from_pem_with_roots(&pem, &ca)
        }
        None => Credentials::from_pem(&pem),
    }
    .with_context(|| format!("Failed to load credentials from {}", cert_path.display()))?;

    tracing::debug!(
        certificates = credentials.chain_len(),
        endpoint = %config.endpoints.get(delivery.channel),
        "Loaded push credentials"
    );

    Ok(apn_core::build_manager(config, credentials))
}

impl MessageArgs {
    fn into_message(self) -> Result<Message> {
        if let Some(json) = self.json {
            let value: Value = serde_json::from_str(&json).context("Invalid --json message")?;
            return Ok(Message::try_from(value)?);
        }

        let mut message = Message::new();
        if let Some(alert) = self.alert {
            message.insert("alert", alert);
        }
        if let Some(badge) = self.badge {
            message.insert("badge", badge);
        }
        if let Some(sound) = self.sound {
            if sound == "true" {
                message.insert("sound", true);
            } else {
                message.insert("sound", sound);
            }
        }
        if self.content_available {
            message.insert("content-available", 1);
        }
        if let Some(custom) = self.custom {
            let custom: Value = serde_json::from_str(&custom).context("Invalid --custom JSON")?;
            message.insert("custom", custom);
        }
        Ok(message)
    }
}

impl StyleArgs {
    fn into_style(self, config: &PushConfig) -> Result<Style> {
        let mut style = Style::new().with_format(self.format).with_debug(self.debug);

        if let Some(identifier) = self.identifier {
            let bytes = hex::decode(&identifier).context("Identifier must be hex")?;
            let identifier = <[u8; 4]>::try_from(bytes.as_slice())
                .map_err(|_| anyhow::anyhow!("Identifier must be exactly 4 bytes"))?;
            style = style.with_identifier(identifier);
        }
        if let Some(expiry) = self.expiry {
            style = style.with_expiry(parse_expiry(&expiry)?);
        }
        if let Some(priority) = self.priority {
            style = style.with_priority(priority);
        }
        if let Some(one_in) = self.debug_sample.or(config.debug_sample) {
            style = style.with_debug_sample(one_in);
        }
        Ok(style)
    }
}

fn parse_expiry(s: &str) -> Result<u32> {
    if let Ok(secs) = s.parse::<u32>() {
        return Ok(secs);
    }
    let time = chrono::DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Expiry '{}' is neither unix seconds nor RFC 3339", s))?;
    u32::try_from(time.timestamp()).context("Expiry out of range")
}

fn format_timestamp(secs: u32) -> String {
    chrono::DateTime::from_timestamp(i64::from(secs), 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}

fn warn_long_alert(message: &Message) {
    if let Some(Value::String(alert)) = message.get("alert") {
        if alert.chars().count() > MAX_ALERT_LENGTH {
            println!(
                "{} Alert is {} characters, longer than the {} recommended",
                "⚠".yellow(),
                alert.chars().count(),
                MAX_ALERT_LENGTH
            );
        }
    }
}
