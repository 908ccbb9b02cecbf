use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use dashsync::range::{self, DateRangeToken};
use dashsync::{
    Dashboard, DashboardConfig, FetchOutcome, FetchStrategy, InMemoryRecordApi, Record,
    SortDirection, SortKey, StatusBucket,
};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dashsync-inspect")]
#[command(about = "Developer tooling for inspecting dashboard views over a record file")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the display list for a bucket
    List {
        #[command(flatten)]
        view: ViewArgs,
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long, default_value = "date")]
        sort_by: String,
        #[arg(long, default_value = "desc")]
        order: String,
    },
    /// Print the stats snapshot for a bucket and date range
    Stats {
        #[command(flatten)]
        view: ViewArgs,
    },
    /// Resolve a date range token or explicit bounds
    Range {
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
}

#[derive(Args)]
struct ViewArgs {
    /// JSON array of records
    #[arg(long)]
    records: PathBuf,
    #[arg(long, default_value = "record")]
    entity: String,
    #[arg(long, default_value = "records")]
    plural: String,
    #[arg(long, default_value = "all")]
    bucket: String,
    /// 1D, 1M, 1Y or YTD
    #[arg(long, default_value = "1M")]
    range: String,
    #[arg(long)]
    start: Option<String>,
    #[arg(long)]
    end: Option<String>,
    #[arg(long)]
    amount_field: Option<String>,
    #[arg(long, default_value_t = dashsync::DEFAULT_PAGE_SIZE)]
    page_size: u32,
    /// Fetch archived and active records separately
    #[arg(long)]
    per_partition: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::List {
            view,
            search,
            sort_by,
            order,
        } => {
            let direction = SortDirection::parse(&order)
                .ok_or_else(|| anyhow!("unknown sort order '{}'", order))?;
            let dashboard = open_dashboard(&view).await?;
            dashboard.set_search(&search).await;
            dashboard.set_sort(SortKey::new(sort_by, direction)).await;
            let list = dashboard.display_list().await;
            println!("{}", serde_json::to_string_pretty(&list)?);
            eprintln!("{} record(s)", list.len());
            Ok(())
        }
        Command::Stats { view } => {
            let dashboard = open_dashboard(&view).await?;
            let range = dashboard.read(|state| *state.date_range()).await;
            println!(
                "range: {} .. {} ({})",
                range.start.to_rfc3339(),
                range.end.to_rfc3339(),
                range.token.map(|t| t.to_string()).unwrap_or_else(|| "custom".to_string())
            );
            for (name, value) in dashboard.stats().await.iter() {
                println!("{:<20} {}", name, value);
            }
            Ok(())
        }
        Command::Range { token, start, end } => {
            let token = token
                .map(|raw| {
                    DateRangeToken::parse(&raw).ok_or_else(|| anyhow!("unknown range token '{}'", raw))
                })
                .transpose()?;
            let resolved = range::resolve(token, start.as_deref(), end.as_deref());
            println!("{}", serde_json::to_string_pretty(&resolved)?);
            Ok(())
        }
    }
}

async fn open_dashboard(args: &ViewArgs) -> Result<Dashboard<InMemoryRecordApi>> {
    let bucket = StatusBucket::parse(&args.bucket)
        .ok_or_else(|| anyhow!("unknown bucket '{}'", args.bucket))?;

    let raw = fs::read_to_string(&args.records)
        .with_context(|| format!("Failed to read records file '{}'", args.records.display()))?;
    let records: Vec<Record> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse records file '{}'", args.records.display()))?;

    let mut config = DashboardConfig::new(&args.entity, &args.plural)
        .page_size(args.page_size)
        .default_bucket(bucket)
        .fetch_strategy(if args.per_partition {
            FetchStrategy::PerPartition
        } else {
            FetchStrategy::Mixed
        });
    if let Some(field) = &args.amount_field {
        config = config.amount_field(field);
    }

    let api = InMemoryRecordApi::with_records(records).await;
    let dashboard = dashsync::open_in_memory(config, api).await?;
    while let FetchOutcome::Applied { .. } = dashboard.load_more().await? {}

    match (&args.start, &args.end) {
        (Some(start), Some(end)) => {
            dashboard.set_custom_range(start, end).await;
        }
        _ => {
            let token = DateRangeToken::parse(&args.range)
                .ok_or_else(|| anyhow!("unknown range token '{}'", args.range))?;
            dashboard.set_date_range(token).await;
        }
    }
    Ok(dashboard)
}
