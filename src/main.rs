//! gardens-indexer: replay, query and inspect Gardens pool state
//!
//! - `replay` folds a JSON-lines event log, ingests pending metadata and
//!   persists the snapshot
//! - `serve` loads the snapshot and runs the query API
//! - `conviction` prints a live conviction report for one proposal
//! - `percent` evaluates a single percentage

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::RwLock;
use tracing::info;

use gardens_indexer::api::{create_router, routes::ConvictionResponse, ApiState};
use gardens_indexer::chain::{JsonRpcClient, PinnedHead};
use gardens_indexer::config::{Config, Overrides};
use gardens_indexer::conviction::{percentage_of, ChainHead, ConvictionReader};
use gardens_indexer::events::parse_event_log;
use gardens_indexer::indexer::{DynReader, Indexer, RecordedReader};
use gardens_indexer::ipfs::{ContentIngestor, MetadataResolver};
use gardens_indexer::model::amount;
use gardens_indexer::store::SnapshotDb;

#[derive(Parser)]
#[command(name = "gardens-indexer")]
#[command(about = "Event indexer and conviction reader for Gardens pools")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "gardens-indexer.toml")]
    config: String,

    /// Data directory
    #[arg(short, long, env = "GARDENS_DATA_DIR")]
    data_dir: Option<String>,

    /// JSON-RPC endpoint for the live chain head
    #[arg(long, env = "GARDENS_RPC_URL")]
    rpc_url: Option<String>,

    /// IPFS gateway base URL
    #[arg(long, env = "GARDENS_IPFS_GATEWAY")]
    ipfs_gateway: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fold an event log into a fresh snapshot
    Replay {
        /// JSON-lines file, one log event per line
        #[arg(long)]
        events: PathBuf,

        /// Recorded contract reads (JSON)
        #[arg(long)]
        reads: Option<PathBuf>,

        /// Leave metadata pending instead of fetching it
        #[arg(long)]
        skip_content: bool,
    },
    /// Serve the query API from the persisted snapshot
    Serve,
    /// Print the conviction report of a proposal
    Conviction {
        /// Proposal id, `{strategy}-{number}`
        proposal_id: String,
    },
    /// Evaluate numerator / denominator as a percentage
    Percent {
        numerator: String,
        denominator: String,
        #[arg(long)]
        decimals: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gardens_indexer=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(std::path::Path::new(&cli.config))?;
    config.apply_overrides(Overrides {
        data_dir: cli.data_dir.map(PathBuf::from),
        rpc_url: cli.rpc_url,
        ipfs_gateway: cli.ipfs_gateway,
    });

    match cli.command {
        Commands::Replay {
            events,
            reads,
            skip_content,
        } => replay(&config, &events, reads.as_deref(), skip_content).await,
        Commands::Serve => serve(config).await,
        Commands::Conviction { proposal_id } => conviction(&config, &proposal_id).await,
        Commands::Percent {
            numerator,
            denominator,
            decimals,
        } => {
            let numerator = amount::parse(&numerator).context("numerator is not an integer")?;
            let denominator = amount::parse(&denominator).context("denominator is not an integer")?;
            let decimals = decimals.unwrap_or(config.conviction.decimals);
            match percentage_of(&numerator, &denominator, decimals) {
                Some(pct) => println!("{}%", pct.to_fixed(config.conviction.display_digits)),
                None => println!("undefined"),
            }
            Ok(())
        }
    }
}

async fn replay(
    config: &Config,
    events: &std::path::Path,
    reads: Option<&std::path::Path>,
    skip_content: bool,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(events)
        .with_context(|| format!("reading event log {}", events.display()))?;
    let log = parse_event_log(&content);
    let reader = match reads {
        Some(path) => RecordedReader::load(path)?,
        None => RecordedReader::new(),
    };
    info!(lines = log.len(), "Replaying event log");

    let mut indexer = Indexer::with_warning_capacity(reader, config.indexer.warning_capacity);
    let stats = indexer.replay(log.iter());
    info!(
        applied = stats.applied,
        rejected = stats.rejected,
        warnings = stats.warnings,
        "Replay complete"
    );

    let indexer = Arc::new(RwLock::new(indexer));
    if !skip_content {
        let ingestor = ContentIngestor::new(MetadataResolver::new(&config.ipfs), config.ipfs.fetch_concurrency);
        ingestor.drain(&indexer).await;
    }

    let snapshot = indexer.read().await.snapshot();
    let mut db = SnapshotDb::open(&config.indexer.data_dir)?;
    db.save(&snapshot)?;

    let counts = snapshot.store.counts();
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}

fn load_indexer(config: &Config) -> anyhow::Result<Indexer<DynReader>> {
    let db = SnapshotDb::open(&config.indexer.data_dir)?;
    let snapshot = db.load()?;
    let reader: DynReader = Box::new(RecordedReader::new());
    Ok(Indexer::from_snapshot(reader, snapshot, config.indexer.warning_capacity))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let indexer = Arc::new(RwLock::new(load_indexer(&config)?));
    if let Some(cursor) = indexer.read().await.cursor() {
        info!(block = cursor.0, log_index = cursor.1, "Resuming from snapshot");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api.http_port));
    let app = create_router(Arc::new(ApiState::new(indexer, config)));

    info!("Query API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn conviction(config: &Config, proposal_id: &str) -> anyhow::Result<()> {
    let indexer = load_indexer(config)?;
    let proposal_id = proposal_id.to_lowercase();
    let pinned = indexer.cursor().map(|c| c.0).unwrap_or_default();
    let indexer = Arc::new(RwLock::new(indexer));

    let report = match &config.chain.rpc_url {
        Some(url) => {
            let client = JsonRpcClient::new(url.clone(), Duration::from_secs(config.chain.timeout_secs));
            conviction_report(indexer, client, config, &proposal_id).await?
        }
        None => conviction_report(indexer, PinnedHead(pinned), config, &proposal_id).await?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn conviction_report<C: ChainHead>(
    indexer: Arc<RwLock<Indexer<DynReader>>>,
    chain: C,
    config: &Config,
    proposal_id: &str,
) -> anyhow::Result<ConvictionResponse> {
    let report = ConvictionReader::new(indexer, chain)
        .with_decimals(config.conviction.decimals)
        .with_block_time(config.chain.block_time_secs)
        .read(proposal_id)
        .await?;
    Ok(ConvictionResponse::new(
        proposal_id.to_string(),
        report,
        config.conviction.display_digits,
    ))
}
