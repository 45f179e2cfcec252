//! prodsearch CLI - hybrid product search from the command line.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use prodsearch_core::{BackendKind, Candidate, ProductSearchConfig, SearchError};
use prodsearch_ingest::{
    load_products, preprocess, product_json_schema, save_json_schema, CatalogStatistics,
};
use prodsearch_query::{export_csv, export_json, result_rows, SearchSummary};
use prodsearch_service::{SearchParams, SearchService, EVAL_QUERIES};

/// prodsearch - vector + BM25 product search with price filters
#[derive(Parser)]
#[command(name = "prodsearch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/prodsearch/config.toml, then ./prodsearch.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Vector backend: memory, sqlite or pinecone
    #[arg(short, long, global = true)]
    backend: Option<BackendKind>,

    /// SQLite database path
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Use the hashed bag-of-words embedder instead of the ONNX model
    #[arg(long, global = true)]
    mock_embedder: bool,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hybrid search; price phrases like "under $100" filter results
    Search {
        /// Search query
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Maximum number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Vector-only search with a similarity floor; no price parsing
    Semantic {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Drop results below this cosine similarity
        #[arg(short, long, default_value = "0.0", allow_hyphen_values = true)]
        min_similarity: f32,

        /// Write results to a .csv or .json file
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Load a product CSV into the vector store
    Ingest {
        /// Catalog CSV (default: ingest.data_dir/ingest.products_file)
        csv: Option<PathBuf>,
    },

    /// Products similar to a given product
    Recommend {
        id: i64,

        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Write results to a .csv or .json file
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Products in a category
    Category {
        name: String,

        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Write results to a .csv or .json file
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Products within a price range, cheapest first
    PriceRange {
        min: f64,
        max: f64,

        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Write results to a .csv or .json file
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Show one product
    Product { id: i64 },

    /// Show store statistics, and catalog statistics when a CSV is given
    Stats { csv: Option<PathBuf> },

    /// Print or save the product JSON Schema
    Schema {
        /// Output file (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the evaluation query set and report latency
    Eval {
        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn load_config(cli: &Cli) -> Result<ProductSearchConfig, SearchError> {
    let mut config = match &cli.config {
        Some(path) => ProductSearchConfig::load(path)?,
        None => ProductSearchConfig::load_default()?,
    };
    config.apply_env()?;

    if let Some(backend) = cli.backend {
        config.store.backend = backend;
    }
    if let Some(db) = &cli.database {
        config.store.sqlite.path = db.clone();
    }
    Ok(config)
}

async fn open_service(cli: &Cli, config: &ProductSearchConfig) -> Result<SearchService, SearchError> {
    if config.store.backend == BackendKind::Sqlite {
        if let Some(parent) = config.store.sqlite.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    if cli.mock_embedder {
        SearchService::open_mock(config).await
    } else {
        SearchService::open(config).await
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error [{}]: {}", e.error_code(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), SearchError> {
    let config = load_config(&cli)?;

    // Commands that never touch the store.
    match &cli.command {
        Commands::Schema { output } => return schema(output.as_deref()),
        Commands::Stats { csv: Some(csv) } => catalog_stats(csv, cli.json)?,
        _ => {}
    }

    let service = open_service(&cli, &config).await?;
    let result = dispatch(&cli, &config, &service).await;
    service.shutdown().await?;
    result
}

async fn dispatch(
    cli: &Cli,
    config: &ProductSearchConfig,
    service: &SearchService,
) -> Result<(), SearchError> {
    match &cli.command {
        Commands::Search { query, top_k } => {
            let params = SearchParams {
                query: query.join(" "),
                top_k: *top_k,
            };
            let response = service.search(params).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
                return Ok(());
            }

            println!(
                "Found {} results for {:?} ({}):\n",
                response.results.len(),
                response.query,
                response.constraint
            );
            for (rank, result) in response.results.iter().enumerate() {
                println!(
                    "{:>2}. {}  {}",
                    rank + 1,
                    result.title.as_deref().unwrap_or("(untitled)"),
                    format_price(result.price)
                );
                if let Some(url) = &result.url {
                    println!("    {}", url);
                }
            }
        }

        Commands::Semantic {
            query,
            top_k,
            min_similarity,
            export,
        } => {
            let results = service
                .semantic(&query.join(" "), *top_k, *min_similarity)
                .await?;
            print_candidates(&results, cli.json, export.as_deref())?;
        }

        Commands::Ingest { csv } => {
            let path = csv.clone().unwrap_or_else(|| config.ingest.products_path());
            let report = service.ingest_csv(&path).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Ingested {} products from {}", report.ingested, path.display());
                println!("- Rows read: {}", report.validation.total_rows);
                println!("- Duplicate rows dropped: {}", report.duplicate_rows);
                println!("- Invalid rows dropped: {}", report.invalid_rows);
                println!("- Duplicate ids dropped: {}", report.duplicate_ids);
            }
        }

        Commands::Recommend { id, top_k, export } => {
            let results = service.recommend(*id, *top_k).await?;
            print_candidates(&results, cli.json, export.as_deref())?;
        }

        Commands::Category { name, top_k, export } => {
            let results = service.by_category(name, *top_k).await?;
            print_candidates(&results, cli.json, export.as_deref())?;
        }

        Commands::PriceRange {
            min,
            max,
            top_k,
            export,
        } => {
            let results = service.by_price_range(*min, *max, *top_k).await?;
            print_candidates(&results, cli.json, export.as_deref())?;
        }

        Commands::Product { id } => {
            let product = service.product(*id).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&product)?);
            } else {
                println!("[{}] {}", id, product.title.as_deref().unwrap_or("(untitled)"));
                println!("- Category: {}", product.category.as_deref().unwrap_or("-"));
                println!("- Price: {}", format_price(product.price));
                println!("- URL: {}", product.url.as_deref().unwrap_or("-"));
                if let Some(description) = &product.description {
                    println!("\n{}", description);
                }
            }
        }

        Commands::Stats { .. } => {
            let stats = service.stats().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Store statistics:\n");
                println!("- Backend: {}", stats.backend);
                println!("- Vectors: {}", stats.vectors);
                println!("- Dimension: {}", stats.dimension);
            }
        }

        Commands::Eval { top_k } => {
            let report = service.evaluate(&EVAL_QUERIES, Some(*top_k)).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }

            println!("=== Backend: {} ===", report.backend.to_uppercase());
            for run in &report.queries {
                println!("\nQuery: {} ({:.2} ms)", run.query, run.latency_ms);
                for (i, r) in run.results.iter().enumerate() {
                    println!(
                        "  {}. {} {}",
                        i + 1,
                        r.title.as_deref().unwrap_or("(untitled)"),
                        format_price(r.price)
                    );
                }
            }
            println!(
                "\nLatency (ms): mean={:.2}, p50={:.2}, p95={:.2}",
                report.mean_ms, report.p50_ms, report.p95_ms
            );
        }

        Commands::Schema { .. } => {}
    }

    Ok(())
}

fn schema(output: Option<&Path>) -> Result<(), SearchError> {
    match output {
        Some(path) => {
            save_json_schema(path)?;
            println!("Schema written to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&product_json_schema())?),
    }
    Ok(())
}

fn catalog_stats(csv: &Path, json: bool) -> Result<(), SearchError> {
    let clean = preprocess(&load_products(csv)?)?;
    let stats = CatalogStatistics::from_products(&clean.products);

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Catalog statistics for {}:\n", csv.display());
    println!("- Products: {}", stats.total_products);
    for (category, count) in &stats.categories {
        println!("  - {}: {}", category, count);
    }
    if let (Some(min), Some(max), Some(mean), Some(median)) = (
        stats.price.min,
        stats.price.max,
        stats.price.mean,
        stats.price.median,
    ) {
        println!(
            "- Price: min ${:.2}, max ${:.2}, mean ${:.2}, median ${:.2}",
            min, max, mean, median
        );
    }
    println!();
    Ok(())
}

fn print_candidates(
    candidates: &[Candidate],
    json: bool,
    export: Option<&Path>,
) -> Result<(), SearchError> {
    if let Some(path) = export {
        let written = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => export_json(candidates, path)?,
            _ => export_csv(candidates, path)?,
        };
        if written {
            println!("Results exported to {}", path.display());
        }
    }

    let rows = result_rows(candidates);
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let summary = SearchSummary::from_candidates(candidates);
    println!("Found {} results", summary.total_results);
    if let Some((min, max)) = summary.price_range {
        println!("Prices ${:.2} - ${:.2} (avg ${:.2})", min, max, summary.avg_price);
    }
    if !summary.categories.is_empty() {
        println!("Categories: {}", summary.categories.join(", "));
    }
    println!();

    for row in rows {
        println!(
            "[{}] {}  {}  (similarity: {:.3})",
            row.id,
            row.title.as_deref().unwrap_or("(untitled)"),
            format_price(row.price),
            row.similarity_score
        );
    }
    Ok(())
}

fn format_price(price: Option<f64>) -> String {
    price.map(|p| format!("${:.2}", p)).unwrap_or_default()
}
