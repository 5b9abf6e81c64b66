mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{config_path, load_config, GardenConfig};
use garden_core::redaction::redact;
use garden_ingest::{ChatGptImporter, ImportOptions};
use garden_query::{
    ContextPackRequest, ConversationQueries, SearchRequest, TopicMapRequest,
};
use garden_storage::{MessageStore, SearchFilters};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "garden")]
#[command(about = "Conversation memory: import, search, threads, topics and context packs", long_about = None)]
struct Cli {
    /// Config file (defaults to $XDG_CONFIG_HOME/garden/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a ChatGPT export (.zip or conversations.json)
    Import {
        path: PathBuf,
        #[arg(long)]
        owner_id: Option<String>,
        /// Store message text without PII redaction
        #[arg(long)]
        no_redact: bool,
    },
    /// List conversations, most recently active first
    Conversations {
        #[arg(long)]
        owner: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Aggregate statistics for one conversation
    Stats { conv_id: String },
    /// All messages of a conversation, oldest first
    Timeline { conv_id: String },
    /// Ancestors and descendants around one message
    Thread {
        conv_id: String,
        msg_id: String,
        #[arg(long)]
        depth: Option<usize>,
    },
    /// Keyword search with highlights
    Search {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        conv_id: Option<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
    /// Frequency-based topics over a time window
    Topics {
        #[arg(long)]
        conv_id: Option<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        min_occurrences: Option<usize>,
        #[arg(long)]
        sample_limit: Option<usize>,
        #[arg(long)]
        max_messages: Option<usize>,
    },
    /// Token-budgeted context block from <conv_id>/<msg_id> identifiers
    Pack {
        #[arg(required = true)]
        message_ids: Vec<String>,
        #[arg(long)]
        max_tokens: Option<usize>,
        #[arg(long)]
        model: Option<String>,
    },
    /// Redact PII from TEXT, or from stdin when TEXT is omitted
    Redact {
        text: Option<String>,
        #[arg(long)]
        disable: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.config.clone().unwrap_or_else(config_path);
    let mut config = load_config(&path)?;
    config.apply_env(|key| std::env::var(key).ok());
    if let Some(db) = cli.db.clone() {
        config.database_path = Some(db);
    }
    init_logging(&config.log_level);

    run(cli.command, &config)
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_env("GARDEN_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run(command: Commands, config: &GardenConfig) -> Result<()> {
    let queries = ConversationQueries::new(config.query_config());
    let store = || open_store(config);

    match command {
        Commands::Redact { text, disable } => {
            let text = match text {
                Some(text) => text,
                None => {
                    let mut buffer = String::new();
                    io::stdin()
                        .read_to_string(&mut buffer)
                        .context("failed to read stdin")?;
                    buffer
                }
            };
            println!("{}", redact(Some(&text), !disable));
            Ok(())
        }
        Commands::Import {
            path,
            owner_id,
            no_redact,
        } => {
            let importer = ChatGptImporter::new(ImportOptions {
                owner_id: owner_id.unwrap_or_else(|| config.owner_id.clone()),
                enable_pii: config.enable_pii && !no_redact,
            });
            let report = importer
                .import_path(&store()?, &path)
                .with_context(|| format!("failed to import {}", path.display()))?;
            print_json(&report)
        }
        Commands::Conversations {
            owner,
            limit,
            offset,
        } => print_json(&queries.list_conversations(
            &store()?,
            owner.as_deref(),
            limit,
            offset,
        )?),
        Commands::Stats { conv_id } => {
            print_json(&queries.conversation_stats(&store()?, &conv_id)?)
        }
        Commands::Timeline { conv_id } => print_json(&queries.timeline(&store()?, &conv_id)?),
        Commands::Thread {
            conv_id,
            msg_id,
            depth,
        } => print_json(&queries.thread(&store()?, &conv_id, &msg_id, depth)?),
        Commands::Search {
            query,
            limit,
            role,
            conv_id,
            from,
            to,
        } => {
            let request = SearchRequest {
                query,
                limit,
                filters: SearchFilters {
                    role,
                    conv_id,
                    date_from: from,
                    date_to: to,
                },
            };
            print_json(&queries.search(&store()?, &request)?)
        }
        Commands::Topics {
            conv_id,
            from,
            to,
            limit,
            min_occurrences,
            sample_limit,
            max_messages,
        } => {
            let request = TopicMapRequest {
                date_from: from,
                date_to: to,
                conv_id,
                limit,
                min_occurrences,
                sample_limit,
                max_messages,
            };
            print_json(&queries.topic_map(&store()?, &request)?)
        }
        Commands::Pack {
            message_ids,
            max_tokens,
            model,
        } => {
            let request = ContextPackRequest {
                message_ids,
                max_tokens,
                model,
            };
            print_json(&queries.context_pack(&store()?, &request)?)
        }
    }
}

fn open_store(config: &GardenConfig) -> Result<MessageStore> {
    let path = config.database_path();
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    info!(path = %path.display(), "opening message store");
    MessageStore::open(&path).with_context(|| format!("failed to open {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{rendered}");
    Ok(())
}
