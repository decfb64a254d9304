//! CLI command definitions, routing, and tracing setup.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use kbchat_core::{
    Collaborators, HashingEmbedder, IngestProgress, IngestSummary, KnowledgeBase,
    OpenRouterGenerator, RetrievalOrchestrator, load_directory, seed_documents,
};
use kbchat_graph::SimilarityGraph;
use kbchat_shared::{
    AppConfig, ChatExchange, ChatResponse, Credentials, SelectionPolicy, SourceAttribution,
    init_config, load_config,
};
use kbchat_storage::Storage;
use kbchat_tools::{Arguments, ToolRouter};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Prior exchanges passed back to the generator in `chat`.
const HISTORY_LIMIT: usize = 10;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// kbchat: answers grounded in your knowledge base.
#[derive(Parser)]
#[command(
    name = "kbchat",
    version,
    about = "Ask questions against a local knowledge base, widened by a similarity graph and live web search.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Context selection policy.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum PolicyArg {
    /// Direct matches plus their similarity-graph neighbors.
    Broad,
    /// Only the single best match.
    TopMatch,
}

impl From<PolicyArg> for SelectionPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Broad => SelectionPolicy::BroadContext,
            PolicyArg::TopMatch => SelectionPolicy::TopMatchOnly,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Answer a single question.
    Ask {
        /// The question.
        query: String,

        /// Context policy (defaults to `retrieval.policy` from config).
        #[arg(short, long)]
        policy: Option<PolicyArg>,

        /// Print the full response payload as JSON.
        #[arg(long)]
        json: bool,

        /// Database path (defaults to `storage.database_path`).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Interactive conversation on stdin.
    Chat {
        /// Context policy (defaults to `retrieval.policy` from config).
        #[arg(short, long)]
        policy: Option<PolicyArg>,

        /// Database path (defaults to `storage.database_path`).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Load `.txt` files (and optionally the seed documents) into the knowledge base.
    Load {
        /// Directory of `.txt` files.
        dir: PathBuf,

        /// Also load the built-in seed documents.
        #[arg(long)]
        seed: bool,

        /// Database path (defaults to `storage.database_path`).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Show a document's similarity-graph neighbors.
    Related {
        /// Document id.
        id: String,

        /// Database path (defaults to `storage.database_path`).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Remove a document from the knowledge base.
    Forget {
        /// Document id.
        id: String,

        /// Database path (defaults to `storage.database_path`).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Inspect and run capabilities.
    Tools {
        #[command(subcommand)]
        action: ToolsAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Tool subcommands.
#[derive(Subcommand)]
pub(crate) enum ToolsAction {
    /// List every available capability.
    List,
    /// Run one capability.
    Run {
        /// Capability name, e.g. `web_search`.
        name: String,

        /// Argument as `key=value` (repeatable).
        #[arg(long = "arg", value_parser = parse_key_value)]
        args: Vec<(String, String)>,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "kbchat=warn",
        1 => "kbchat=info",
        2 => "kbchat=debug",
        _ => "kbchat=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ask {
            query,
            policy,
            json,
            db,
        } => cmd_ask(&query, policy, json, db.as_deref()).await,
        Command::Chat { policy, db } => cmd_chat(policy, db.as_deref()).await,
        Command::Load { dir, seed, db } => cmd_load(&dir, seed, db.as_deref()).await,
        Command::Related { id, db } => cmd_related(&id, db.as_deref()).await,
        Command::Forget { id, db } => cmd_forget(&id, db.as_deref()).await,
        Command::Tools { action } => match action {
            ToolsAction::List => cmd_tools_list().await,
            ToolsAction::Run { name, args } => cmd_tools_run(&name, args).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Storage, embedder, and graph shared by every command.
struct KnowledgeStores {
    storage: Arc<Storage>,
    embedder: Arc<HashingEmbedder>,
    graph: Arc<SimilarityGraph>,
}

impl KnowledgeStores {
    async fn open(config: &AppConfig, db: Option<&Path>) -> Result<Self> {
        let path = match db {
            Some(p) => p.to_path_buf(),
            None => config.storage.resolved_path()?,
        };
        info!(path = %path.display(), "opening knowledge store");
        Ok(Self {
            storage: Arc::new(Storage::open(&path).await?),
            embedder: Arc::new(HashingEmbedder::from_config(&config.embedding)),
            graph: Arc::new(SimilarityGraph::from_config(&config.graph)),
        })
    }

    fn knowledge_base(&self) -> KnowledgeBase {
        KnowledgeBase::new(self.embedder.clone(), self.storage.clone(), self.graph.clone())
    }
}

async fn build_orchestrator(config: &AppConfig, db: Option<&Path>) -> Result<RetrievalOrchestrator> {
    let credentials = Credentials::from_env(config);
    let stores = KnowledgeStores::open(config, db).await?;

    if config.graph.preload {
        if let Err(e) = stores.knowledge_base().hydrate_graph().await {
            warn!(error = %e, "graph preload failed, answering with index matches only");
        }
    }

    let generator = OpenRouterGenerator::new(
        &config.generator,
        credentials.generator_api_key.clone(),
        config.timeouts.generator(),
    )?;
    let collaborators = Collaborators {
        embedder: stores.embedder,
        index: stores.storage,
        graph: stores.graph,
        tools: Arc::new(ToolRouter::from_config(&config.tools, &credentials)?),
        generator: Arc::new(generator),
    };
    Ok(RetrievalOrchestrator::new(config, collaborators)?)
}

fn resolve_policy(config: &AppConfig, arg: Option<PolicyArg>) -> SelectionPolicy {
    arg.map(SelectionPolicy::from).unwrap_or(config.retrieval.policy)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_ask(query: &str, policy: Option<PolicyArg>, json: bool, db: Option<&Path>) -> Result<()> {
    let config = load_config()?;
    let policy = resolve_policy(&config, policy);
    let orchestrator = build_orchestrator(&config, db).await?;

    info!(query, %policy, "answering question");
    let spinner = spinner("Thinking...");
    let response = orchestrator.respond(query, &[], policy).await;
    spinner.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    Ok(())
}

async fn cmd_chat(policy: Option<PolicyArg>, db: Option<&Path>) -> Result<()> {
    let config = load_config()?;
    let policy = resolve_policy(&config, policy);
    let orchestrator = build_orchestrator(&config, db).await?;

    println!("kbchat ({policy}). Type 'exit' to quit.");
    let mut history: Vec<ChatExchange> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if matches!(query, "exit" | "quit") {
            break;
        }

        let spinner = spinner("Thinking...");
        let response = orchestrator.respond(query, &history, policy).await;
        spinner.finish_and_clear();
        print_response(&response);

        history.push(ChatExchange {
            user: query.to_string(),
            assistant: response.metadata.error.is_none().then(|| response.response.clone()),
        });
        if history.len() > HISTORY_LIMIT {
            history.remove(0);
        }
    }
    Ok(())
}

async fn cmd_load(dir: &Path, seed: bool, db: Option<&Path>) -> Result<()> {
    let config = load_config()?;
    let stores = KnowledgeStores::open(&config, db).await?;

    let mut documents = if seed { seed_documents() } else { Vec::new() };
    let seeded = documents.len();
    documents.extend(load_directory(dir).await?);

    if documents.is_empty() {
        warn!(dir = %dir.display(), "no documents to load");
        println!("No .txt files found in {}", dir.display());
        return Ok(());
    }

    let reporter = CliProgress::new();
    let summary = stores.knowledge_base().ingest(documents, &reporter).await?;

    println!();
    println!("  Knowledge base updated!");
    println!("  Seed docs:  {seeded}");
    println!("  File docs:  {}", summary.documents - seeded);
    println!("  Graph edges: {}", summary.edges);
    println!("  Total docs: {}", stores.storage.count_documents().await?);
    println!("  Time:       {:.1}s", summary.elapsed.as_secs_f64());
    println!();
    println!("  Categories:");
    for (category, count) in stores.storage.category_counts().await? {
        println!("    - {category}: {count}");
    }
    println!();
    Ok(())
}

async fn cmd_related(id: &str, db: Option<&Path>) -> Result<()> {
    let config = load_config()?;
    let stores = KnowledgeStores::open(&config, db).await?;
    stores.knowledge_base().hydrate_graph().await?;

    let neighbors = stores.graph.neighbors_of(id)?;
    if neighbors.is_empty() {
        println!(
            "{id} has no neighbors above similarity {:.2}",
            stores.graph.threshold()
        );
        return Ok(());
    }
    for n in neighbors {
        println!(
            "{:.3}  {}  {} ({})",
            n.weight,
            n.id,
            n.metadata.topic().unwrap_or("-"),
            n.metadata.category().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn cmd_forget(id: &str, db: Option<&Path>) -> Result<()> {
    let config = load_config()?;
    let stores = KnowledgeStores::open(&config, db).await?;
    stores.knowledge_base().remove(id).await?;
    println!("Removed {id}");
    Ok(())
}

async fn cmd_tools_list() -> Result<()> {
    let config = load_config()?;
    let router = ToolRouter::from_config(&config.tools, &Credentials::from_env(&config))?;
    for capability in router.capabilities() {
        println!("{:<16} {}", capability.name, capability.description);
    }
    Ok(())
}

async fn cmd_tools_run(name: &str, args: Vec<(String, String)>) -> Result<()> {
    let config = load_config()?;
    let router = ToolRouter::from_config(&config.tools, &Credentials::from_env(&config))?;

    let arguments: Arguments = args
        .into_iter()
        .map(|(k, v)| (k, serde_json::Value::String(v)))
        .collect();
    let output = tokio::time::timeout(config.timeouts.live_search(), router.execute(name, &arguments))
        .await
        .map_err(|_| eyre!("capability '{name}' timed out"))??;
    println!("{output}");
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_response(response: &ChatResponse) {
    println!();
    println!("{}", response.response.trim());

    if !response.sources.is_empty() {
        println!();
        println!("Sources:");
        for (i, source) in response.sources.iter().enumerate() {
            match source {
                SourceAttribution::Knowledge(k) => {
                    let relevance = k
                        .relevance_score
                        .as_deref()
                        .map(|s| format!(" relevance {s}"))
                        .unwrap_or_else(|| " (related)".to_string());
                    let file = if k.has_file {
                        format!(" [{}]", k.filename)
                    } else {
                        String::new()
                    };
                    println!("  [{}] {} ({}){relevance}{file}", i + 1, k.topic, k.category);
                }
                SourceAttribution::Live(l) => {
                    println!("  [{}] live {}: \"{}\"", i + 1, l.capability, l.query);
                }
            }
        }
    }

    let meta = &response.metadata;
    let tokens = meta
        .total_tokens
        .map(|t| format!(", {t} tokens"))
        .unwrap_or_default();
    println!();
    println!(
        "({}, {} docs{}, {}{tokens})",
        meta.model,
        meta.rag_documents_used,
        if meta.web_search_used { " + web" } else { "" },
        meta.policy,
    );
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    spinner.set_style(style);
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}

/// Ingest progress rendered as an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        Self {
            spinner: spinner("Starting..."),
        }
    }
}

impl IngestProgress for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn document_embedded(&self, id: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Embedding [{current}/{total}] {id}"));
    }

    fn done(&self, _summary: &IngestSummary) {
        self.spinner.finish_and_clear();
    }
}
