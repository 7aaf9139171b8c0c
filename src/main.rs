//! Palisade: content-safety gateway for a conversational assistant.
//!
//! Usage:
//!   palisade run           Start the engine with a console transport
//!   palisade check TEXT    Run the offline lexical detector over TEXT
//!   palisade status        Show collaborator availability and audit stats

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use palisade::audit::AuditLog;
use palisade::cloud::{
    CompletionClient, CredentialCache, GenerationClient, IamTokenIssuer, ModerationClient,
};
use palisade::config::{self, PalisadeConfig};
use palisade::engine::probe::AvailabilityProbe;
use palisade::engine::{ChatEngine, Collaborators};
use palisade::guard::LexicalFilter;
use palisade::retrieval::RetrieverClient;
use palisade::validator::ValidatorClient;

/// Conversation id used by the built-in console transport.
const CONSOLE_CONVERSATION: i64 = 0;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "palisade")]
#[command(version = "0.1.0")]
#[command(about = "Defense-in-depth content-safety gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to palisade home directory.
    #[arg(long, default_value = "~/.palisade")]
    home: String,

    /// Log level (debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the engine with a console transport.
    Run,

    /// Run the offline lexical detector over a message.
    Check {
        /// Message to score.
        text: String,

        /// Emit the detection as JSON instead of the human-readable form.
        #[arg(long)]
        json: bool,
    },

    /// Show collaborator availability and audit stats.
    Status,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let home_dir = PathBuf::from(shellexpand::tilde(&cli.home).into_owned());

    match cli.command {
        Commands::Run => cmd_run(&home_dir).await,
        Commands::Check { text, json } => cmd_check(&home_dir, &text, json),
        Commands::Status => cmd_status(&home_dir).await,
    }
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

async fn cmd_run(home_dir: &Path) -> Result<()> {
    let (config, engine) = bootstrap(home_dir)?;
    let engine = Arc::new(engine);

    println!(
        "{} palisade '{}' (model: {}, moderation: {})",
        ">>>".green().bold(),
        config.name,
        config.generation_model_uri(),
        if config.moderation_enabled { "on" } else { "off" },
    );
    println!("Type a message, '/clear' to reset history, Ctrl+C to quit.");

    // Supervised availability probe, cancelled at shutdown.
    let cancel = CancellationToken::new();
    let probe = AvailabilityProbe::new(
        engine.retriever(),
        engine.credentials(),
        engine.retrieval_enabled(),
        Duration::from_secs(config.probe_interval_secs),
    );
    let probe_handle = tokio::spawn(probe.run(cancel.clone()));

    console_loop(&engine).await?;

    println!("\n{} Shutting down gracefully...", "<<<".red().bold());
    cancel.cancel();

    let shutdown_timeout = Duration::from_secs(5);
    let _ = tokio::time::timeout(shutdown_timeout, probe_handle).await;

    info!("shutdown complete");
    Ok(())
}

/// Minimal line-oriented transport for local operation.
async fn console_loop(engine: &ChatEngine) -> Result<()> {
    use tokio::io::AsyncBufReadExt;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        print_prompt();

        let line = tokio::select! {
            _ = &mut ctrl_c => return Ok(()),
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };

        let Some(line) = line else {
            return Ok(()); // EOF
        };

        if line.trim() == "/clear" {
            engine.clear_history(CONSOLE_CONVERSATION);
            println!("{}", "History cleared.".yellow());
            continue;
        }

        match engine.handle_turn(CONSOLE_CONVERSATION, &line).await {
            Ok(reply) => println!("{reply}"),
            Err(err) => println!("{}", err.user_message().yellow()),
        }
    }
}

fn print_prompt() {
    use std::io::Write;
    print!("{} ", ">".cyan().bold());
    let _ = std::io::stdout().flush();
}

fn cmd_check(home_dir: &Path, text: &str, json: bool) -> Result<()> {
    let config = load_home_config(home_dir)?;
    let filter = LexicalFilter::new(config.detector_threshold);
    let detection = filter.detect(text);

    if json {
        println!("{}", serde_json::to_string_pretty(&detection)?);
        return Ok(());
    }

    println!();
    println!("{}", "=== Lexical Detection ===".bold());
    println!();
    println!(
        "  {}:  {}",
        "Verdict".bold(),
        if detection.is_suspicious {
            "SUSPICIOUS".red().bold().to_string()
        } else {
            "clean".green().to_string()
        }
    );
    println!(
        "  {}:    {} (threshold {})",
        "Score".bold(),
        detection.score,
        config.detector_threshold
    );
    for hit in &detection.phrase_hits {
        println!("    phrase:  {hit}");
    }
    for hit in &detection.regex_hits {
        println!("    pattern: {hit}");
    }
    println!();
    Ok(())
}

async fn cmd_status(home_dir: &Path) -> Result<()> {
    let (config, engine) = bootstrap(home_dir)?;

    let credential_ok = engine.credentials().get().await.is_ok();
    let retriever_ok = engine.retriever().ping().await;
    let rejections = engine.rejection_count().await;
    let recent = engine.recent_rejections(5).await;

    println!();
    println!("{}", "=== Palisade Status ===".bold());
    println!();
    println!("  {}:  {}", "Name".bold(), config.name);
    println!("  {}: {}", "Model".bold(), config.generation_model_uri());
    println!();
    println!("  {}:", "Collaborators".bold());
    println!("    Credentials: {}", colorize_ok(credential_ok));
    println!("    Retriever:   {}", colorize_ok(retriever_ok));
    println!(
        "    Moderation:  {}",
        if engine.moderation_status().enabled {
            "enabled".green().to_string()
        } else {
            "disabled".yellow().to_string()
        }
    );
    println!();
    println!("  {} ({} total):", "Recent rejections".bold(), rejections);
    if recent.is_empty() {
        println!("    (none)");
    }
    for r in recent {
        println!(
            "    [{}] conv {} {}: {}",
            r.created_at.format("%Y-%m-%d %H:%M"),
            r.conversation_id,
            r.stage,
            r.signal,
        );
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_home_config(home_dir: &Path) -> Result<PalisadeConfig> {
    let config_path = home_dir.join("palisade.toml");
    config::load_config(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))
}

/// Bootstrap the runtime: load config and wire the production collaborators.
fn bootstrap(home_dir: &Path) -> Result<(PalisadeConfig, ChatEngine)> {
    let config = load_home_config(home_dir)?;

    let connect = Duration::from_secs(config.connect_timeout_secs);
    let short = Duration::from_secs(config.short_timeout_secs);

    let private_key = std::fs::read(config.resolved_private_key_path())
        .with_context(|| format!("Failed to read {}", config.private_key_path))?;

    let issuer = IamTokenIssuer::new(
        &config.iam_url,
        &config.service_account_id,
        &config.key_id,
        &private_key,
        connect,
        short,
    )
    .context("Failed to build credential issuer")?;
    let credentials = Arc::new(CredentialCache::new(Arc::new(issuer)));

    let completion = CompletionClient::new(&config.completion_url, &config.folder_id, connect)
        .context("Failed to build completion client")?;
    let generator = GenerationClient::new(
        completion.clone(),
        &config.generation_model_uri(),
        Duration::from_secs(config.generation_timeout_secs),
    );
    let moderator = ModerationClient::new(
        completion,
        &config.moderation_model_uri(),
        Duration::from_secs(config.moderation_timeout_secs),
    );

    let validator = ValidatorClient::new(&config.validator_url, connect, short)
        .context("Failed to build validator client")?;
    let retriever = RetrieverClient::new(&config.retriever_url, connect, short)
        .context("Failed to build retriever client")?;

    let audit = match config.resolved_audit_db_path() {
        Some(path) => Some(
            AuditLog::open(Path::new(&path))
                .with_context(|| format!("Failed to open audit log at {path}"))?,
        ),
        None => None,
    };

    let collaborators = Collaborators {
        credentials,
        validator: Arc::new(validator),
        moderator: Arc::new(moderator),
        retriever: Arc::new(retriever),
        generator: Arc::new(generator),
    };

    let engine = ChatEngine::new(config.clone(), collaborators, audit);
    Ok((config, engine))
}

fn colorize_ok(ok: bool) -> String {
    if ok {
        "ok".green().to_string()
    } else {
        "unavailable".red().to_string()
    }
}
