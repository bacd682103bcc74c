//! CLI entry point for `mailfwd`.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};

use mailfwd::config::Config;
use mailfwd::export::eml;
use mailfwd::forward::{Forwarder, Outcome};
use mailfwd::model::part::{AttachmentLink, PartRole, LINK_EXPIRY};
use mailfwd::parser::{event, mime};
use mailfwd::transform::classify::classify;
use mailfwd::transform::rebuild::rebuild;
use mailfwd::transform::relocate::sanitize_filename;
use mailfwd::{relay, store};

#[derive(Parser)]
#[command(
    name = "mailfwd",
    version,
    about = "Forward inbound mail from a storage bucket through an authorized relay"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to $MAILFWD_CONFIG or the user config dir)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward one stored message by its identifier
    Forward {
        message_id: String,
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Forward the message named by a trigger event (JSON file or stdin)
    Event {
        file: Option<PathBuf>,
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Parse and classify a local .eml file without touching storage or relay
    Inspect {
        file: PathBuf,
        /// Print the rebuilt message with placeholder attachment links
        #[arg(long)]
        rebuild: bool,
        /// Print the classification as JSON
        #[arg(long, conflicts_with = "rebuild")]
        json: bool,
    },
    /// Load and validate the configuration, then print it
    CheckConfig,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

impl Commands {
    fn needs_config(&self) -> bool {
        matches!(
            self,
            Self::Forward { .. } | Self::Event { .. } | Self::CheckConfig
        )
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load before logging is set up so the log level and directory can come
    // from the file; report a failure only once logging works.
    let loaded = cli
        .command
        .needs_config()
        .then(|| Config::load(cli.config.as_deref()));

    let configured = loaded.as_ref().and_then(|r| r.as_ref().ok());
    let log_level = match cli.verbose {
        0 => configured.map_or("warn", |c| c.general.log_level.as_str()),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, configured.and_then(|c| c.general.log_dir.as_deref()));

    let config = loaded.transpose().context("Invalid configuration")?;

    match cli.command {
        Commands::Forward { message_id, json } => {
            cmd_forward(config.as_ref(), &message_id, json)
        }
        Commands::Event { file, json } => {
            let payload = read_input(file.as_deref())?;
            let message_id = event::message_id_from_event(&payload)?;
            cmd_forward(config.as_ref(), &message_id, json)
        }
        Commands::Inspect {
            file,
            rebuild,
            json,
        } => cmd_inspect(&file, rebuild, json),
        Commands::CheckConfig => cmd_check_config(config.as_ref()),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, log_dir: Option<&Path>) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match log_dir.filter(|dir| std::fs::create_dir_all(dir).is_ok()) {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "mailfwd.log");
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_appender);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
        }
    }
}

fn require_config(config: Option<&Config>) -> anyhow::Result<&Config> {
    config.context("configuration was not loaded")
}

/// Run one invocation. A send failure that was routed to the error location
/// is not a process failure.
fn cmd_forward(config: Option<&Config>, message_id: &str, json: bool) -> anyhow::Result<()> {
    let config = require_config(config)?;
    let store = store::from_config(&config.storage)?;
    let relay = relay::from_config(config)?;

    let outcome = Forwarder::new(config, store.as_ref(), relay.as_ref()).forward(message_id)?;
    print_outcome(message_id, &outcome, json)
}

fn print_outcome(message_id: &str, outcome: &Outcome, json: bool) -> anyhow::Result<()> {
    if json {
        let mut value = serde_json::to_value(outcome)?;
        value["message_id"] = serde_json::Value::from(message_id);
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{outcome}");
    }
    Ok(())
}

/// Print how a local message would be classified, or rebuilt.
fn cmd_inspect(path: &Path, show_rebuild: bool, json: bool) -> anyhow::Result<()> {
    let raw = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let tree = mime::parse(&raw)?;
    let parts = classify(&tree);

    if show_rebuild {
        let links: Vec<AttachmentLink> = parts
            .iter()
            .filter(|p| p.role == PartRole::Attachment)
            .filter_map(|p| p.filename.as_ref())
            .map(|name| AttachmentLink {
                filename: name.clone(),
                url: format!("attachment:{}", sanitize_filename(name)),
                expiry: LINK_EXPIRY,
            })
            .collect();
        let rebuilt = rebuild(&tree, &parts, &links);
        std::io::stdout().write_all(&eml::to_bytes(&rebuilt))?;
        return Ok(());
    }

    if json {
        let items: Vec<serde_json::Value> = parts
            .iter()
            .enumerate()
            .map(|(i, p)| {
                serde_json::json!({
                    "index": i,
                    "role": p.role,
                    "content_type": p.node.content_type().mime_type(),
                    "size": p.payload().len(),
                    "filename": p.filename,
                    "content_id": p.content_id,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    use humansize::{format_size, BINARY};

    println!();
    println!("  {:<4} {:<12} {:<32} {:>10}  NAME", "#", "ROLE", "TYPE", "SIZE");
    for (i, part) in parts.iter().enumerate() {
        let name = part
            .filename
            .as_deref()
            .or(part.content_id.as_deref())
            .unwrap_or("");
        println!(
            "  {:<4} {:<12} {:<32} {:>10}  {}",
            i,
            part.role.to_string(),
            part.node.content_type().mime_type(),
            format_size(part.payload().len(), BINARY),
            name
        );
    }
    println!();
    Ok(())
}

fn cmd_check_config(config: Option<&Config>) -> anyhow::Result<()> {
    let config = require_config(config)?;
    print!("{}", config.to_redacted_toml()?);
    Ok(())
}

/// Read a whole file, or stdin when no path is given.
fn read_input(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(p) => std::fs::read_to_string(p).with_context(|| format!("read {}", p.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailfwd", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::stdout().write_all(&buf)?;
    Ok(())
}
