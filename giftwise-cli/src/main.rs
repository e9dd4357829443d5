use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use giftwise_core::catalog::{
    parse_catalog_file, read_products, write_records, ConvertOptions, JsonlWriter, KeyField,
    OutputFormat,
};
use giftwise_core::config::{Config, StorageMode};
use giftwise_core::provider::{OpenAiProvider, Provider};
use giftwise_core::rag::{LoadOptions, RagEngine, SearchFilters, SearchRequest};
use giftwise_core::{ChatManager, Enricher};
use giftwise_tools::catalog_registry;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "giftwise")]
#[command(about = "Catalog pipeline and gift-finder assistant", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Convert an SFCC catalog XML export to JSON")]
    Convert(ConvertArgs),

    #[command(about = "Extract and re-score keywords for every product")]
    Enrich(EnrichArgs),

    #[command(about = "Incrementally load products into the vector store")]
    Load(LoadArgs),

    #[command(about = "Semantic search over the loaded catalog")]
    Search(SearchArgs),

    #[command(about = "Remove products from the vector store")]
    Delete {
        #[arg(long, num_args = 1.., required = true)]
        keys: Vec<String>,
    },

    #[command(about = "Chat with the gift-finder agent")]
    Chat {
        #[arg(long, help = "JSON file the conversation is saved to")]
        session: Option<PathBuf>,
    },

    #[command(about = "Configuration commands")]
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    #[command(about = "Show the effective configuration")]
    Show,
}

#[derive(Args)]
struct ConvertArgs {
    #[arg(long)]
    xml: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long, help = "jsonl or json (default: from the output extension)")]
    format: Option<OutputFormat>,
    #[arg(long, num_args = 1.., help = "Language priority, most preferred first")]
    lang: Vec<String>,
    #[arg(long)]
    pretty: bool,
}

#[derive(Args)]
struct EnrichArgs {
    #[arg(long = "in")]
    input: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    out_format: Option<OutputFormat>,
    #[arg(long)]
    llm_model: Option<String>,
    #[arg(long)]
    embed_model: Option<String>,
    #[arg(long)]
    embed_dim: Option<usize>,
    #[arg(long)]
    topk: Option<usize>,
    #[arg(long)]
    min_sim: Option<f32>,
    #[arg(long)]
    include_embedding: bool,
    #[arg(long)]
    pretty: bool,
    #[arg(long)]
    concurrency: Option<usize>,
    #[arg(long)]
    target_lang: Option<String>,
}

#[derive(Args)]
struct LoadArgs {
    #[arg(long = "in")]
    input: PathBuf,
    #[arg(long)]
    key_field: Option<KeyField>,
    #[arg(long, num_args = 1..)]
    keys: Vec<String>,
    #[arg(long)]
    force: bool,
    #[arg(long, conflicts_with = "no_skip_unchanged")]
    skip_unchanged: bool,
    #[arg(long)]
    no_skip_unchanged: bool,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    max_chars: Option<usize>,
    #[arg(long)]
    embed_model: Option<String>,
    #[arg(long)]
    embed_dim: Option<usize>,
    #[arg(long)]
    redis_url: Option<String>,
    #[arg(long)]
    index_name: Option<String>,
}

#[derive(Args)]
struct SearchArgs {
    #[arg(long)]
    query: String,
    #[arg(long, default_value_t = 8)]
    k: usize,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    brand: Option<String>,
    #[arg(long, num_args = 1..)]
    kw: Vec<String>,
    #[arg(long)]
    min_price: Option<f64>,
    #[arg(long)]
    max_price: Option<f64>,
    #[arg(long)]
    details: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("giftwise_core=info,giftwise_cli=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;

    match cli.command {
        Commands::Convert(args) => convert(&config, args),
        Commands::Enrich(args) => enrich(&mut config, args).await,
        Commands::Load(args) => load(&mut config, args).await,
        Commands::Search(args) => search(&config, args).await,
        Commands::Delete { keys } => delete(&config, &keys).await,
        Commands::Chat { session } => chat(&mut config, session).await,
        Commands::Config { command } => match command {
            ConfigCommands::Show => show_config(&config),
        },
    }
}

/// File (when present), then environment; flags are applied per command.
fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        Config::load(path).with_context(|| format!("Failed to load config {}", path.display()))?
    } else {
        debug!("No config at {}, using defaults", path.display());
        Config::default()
    };
    config.apply_env().context("Invalid environment override")?;
    Ok(config)
}

fn provider(config: &Config) -> Result<Arc<dyn Provider>> {
    let provider = OpenAiProvider::new(&config.llm).context("Failed to create LLM client")?;
    Ok(Arc::new(provider))
}

fn convert(config: &Config, args: ConvertArgs) -> Result<()> {
    let mut options = ConvertOptions::from(&config.catalog);
    if !args.lang.is_empty() {
        options.lang_priority = args.lang;
    }

    let products = parse_catalog_file(&args.xml, &options)
        .with_context(|| format!("Failed to convert {}", args.xml.display()))?;
    let format = args.format.unwrap_or_else(|| OutputFormat::from_path(&args.out));
    write_records(&args.out, &products, format, args.pretty)
        .with_context(|| format!("Failed to write {}", args.out.display()))?;

    println!(
        "{} Converted {} products to {}",
        "✓".green().bold(),
        products.len().to_string().bold(),
        args.out.display()
    );
    Ok(())
}

async fn enrich(config: &mut Config, args: EnrichArgs) -> Result<()> {
    if let Some(model) = args.llm_model {
        config.llm.model = model;
    }
    if let Some(model) = args.embed_model {
        config.embedding.model = model;
    }
    if let Some(dim) = args.embed_dim {
        config.embedding.dimensions = dim;
    }
    if let Some(top_k) = args.topk {
        config.enrich.top_k = top_k;
    }
    if let Some(min_sim) = args.min_sim {
        config.enrich.min_similarity = min_sim;
    }
    if let Some(concurrency) = args.concurrency {
        config.enrich.concurrency = concurrency;
    }
    if let Some(lang) = args.target_lang {
        config.enrich.target_lang = lang;
    }
    config.enrich.include_embedding |= args.include_embedding;
    config.validate()?;

    let products = read_products(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let enricher = Enricher::from_config(provider(config)?, config);
    let format = args.out_format.unwrap_or_else(|| OutputFormat::from_path(&args.out));

    let summary = match format {
        OutputFormat::Jsonl => {
            let mut writer = JsonlWriter::create(&args.out).await?;
            let summary = enricher.enrich_to_jsonl(products, &mut writer).await?;
            writer.finish().await?;
            summary
        }
        OutputFormat::Json => {
            let (enriched, summary) = enricher.enrich_ordered(products).await;
            write_records(&args.out, &enriched, format, args.pretty)?;
            summary
        }
    };

    let failed = if summary.failed > 0 {
        summary.failed.to_string().red().bold()
    } else {
        summary.failed.to_string().normal()
    };
    println!(
        "{} Enriched {} products ({} failed) to {}",
        "✓".green().bold(),
        summary.total.to_string().bold(),
        failed,
        args.out.display()
    );
    Ok(())
}

async fn load(config: &mut Config, args: LoadArgs) -> Result<()> {
    if let Some(model) = args.embed_model {
        config.embedding.model = model;
    }
    if let Some(dim) = args.embed_dim {
        config.embedding.dimensions = dim;
    }
    if let Some(batch) = args.batch_size {
        config.embedding.batch_size = batch;
    }
    if let Some(max_chars) = args.max_chars {
        config.embedding.max_chars = max_chars;
    }
    if let Some(url) = args.redis_url {
        config.storage.storage_mode = StorageMode::Redis { url };
    }
    if let Some(name) = args.index_name {
        config.storage.index_name = name;
    }
    if let Some(key_field) = args.key_field {
        config.sync.key_field = key_field;
    }
    if args.skip_unchanged {
        config.sync.skip_unchanged = true;
    }
    if args.no_skip_unchanged {
        config.sync.skip_unchanged = false;
    }
    config.validate()?;

    let products = read_products(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let engine = RagEngine::new(config, provider(config)?).await?;

    let mut options = LoadOptions::from_config(config);
    options.force = args.force;
    if !args.keys.is_empty() {
        options.keys = Some(args.keys);
    }
    let report = engine.load(products, &options).await?;

    println!(
        "{} Loaded {} of {} products: {} upserted, {} unchanged, {} embedded, {} reused, {} without {}",
        "✓".green().bold(),
        report.selected,
        report.read,
        report.upserted.to_string().bold(),
        report.unchanged,
        report.embedded,
        report.reused_embeddings,
        report.skipped_no_code,
        options.key_field
    );
    if report.degraded > 0 {
        println!(
            "{} {} products were stored with a zero vector",
            "!".yellow().bold(),
            report.degraded
        );
    }
    Ok(())
}

async fn search(config: &Config, args: SearchArgs) -> Result<()> {
    config.validate()?;
    let engine = RagEngine::new(config, provider(config)?).await?;

    let filters = SearchFilters {
        category: args.category,
        brand: args.brand,
        must_keywords: args.kw,
        min_price: args.min_price,
        max_price: args.max_price,
    };
    let mut request = SearchRequest::new(args.query, args.k).with_filters(filters);
    if args.details {
        request = request.with_details(None);
    }
    let results = engine.search(&request).await?;

    println!("{} {} results", "→".blue(), results.count.to_string().bold());
    for hit in &results.items {
        println!(
            "  {} {} {} ({}) {:.4}",
            "•".cyan(),
            hit.code.bold(),
            hit.title,
            hit.category.dimmed(),
            hit.score
        );
        if let Some(product) = &hit.product {
            println!("{}", serde_json::to_string_pretty(product)?);
        }
    }
    Ok(())
}

async fn delete(config: &Config, keys: &[String]) -> Result<()> {
    let engine = RagEngine::new(config, provider(config)?).await?;
    let removed = engine.delete(keys).await?;
    println!(
        "{} Deleted {} of {} products",
        "✓".green().bold(),
        removed.to_string().bold(),
        keys.len()
    );
    Ok(())
}

async fn chat(config: &mut Config, session: Option<PathBuf>) -> Result<()> {
    if let Some(path) = session {
        config.agent.session_path = Some(path.to_string_lossy().into_owned());
    }
    config.validate()?;

    let provider = provider(config)?;
    let engine = Arc::new(RagEngine::new(config, provider.clone()).await?);
    let registry = Arc::new(catalog_registry(engine, config.agent.default_k));
    let mut manager = ChatManager::from_config(config, provider, registry);

    println!(
        "{} (type {} to start over, {} to leave)",
        "GiftFinder".bold().green(),
        "/reset".bold(),
        "/quit".bold()
    );

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("{} ", "you>".bold());
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let input = line?;
        let input = input.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                manager.reset()?;
                println!("{}", "Session cleared.".dimmed());
                continue;
            }
            _ => {}
        }

        match manager.ask(input).await {
            Ok(answer) => println!("{} {}\n", "bot>".bold().cyan(), answer),
            Err(e) => eprintln!("{} {:#}", "error:".red().bold(), e),
        }
    }
    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    let mut shown = config.clone();
    if shown.llm.api_key.is_some() {
        shown.llm.api_key = Some("***".to_string());
    }
    println!("{}", "Current Configuration:".bold().green());
    println!();
    print!("{}", serde_yaml::to_string(&shown).context("Failed to serialize config")?);
    Ok(())
}
