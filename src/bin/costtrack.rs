use chrono::{Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use costtrack::blob_store::BlobStore;
use costtrack::config::TrackerConfig;
use costtrack::cost_model::{monthly_cost, VolumeType};
use costtrack::finding::FindingKind;
use costtrack::findings_cache::{FindingsCache, JsonFileSource};
use costtrack::freshness::Freshness;
use costtrack::ledger::{import_legacy, split_exempt};
use costtrack::normalizer::{InstanceSpecLookup, NoInstanceSpecs, Normalizer, StaticInstanceSpecs};
use costtrack::reconcile::EditSet;
use costtrack::record::{Partition, TrackerRecord, COLUMNS};
use costtrack::session::Session;
use costtrack::table_print::{print_records_table, SUMMARY_COLUMNS};
use costtrack::TrackerStore;
use dotenv::dotenv;
use rustc_hash::FxHashMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "costtrack")]
#[command(about = "Cost optimization tracker maintenance", long_about = None)]
struct Cli {
    /// Treat this date as today (YYYY-MM-DD)
    #[arg(long, global = true)]
    today: Option<NaiveDate>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print one tracker partition
    Show {
        /// InProgress, Complete or Exempt
        partition: Partition,
        /// Print every column instead of the summary set
        #[arg(long)]
        all_columns: bool,
    },
    /// Drop completed savings older than the retention window
    Archive,
    /// Move exempt rows out of InProgress and Complete
    SplitExempt,
    /// Split a single legacy tracker table into the three partitions
    ImportLegacy {
        file: PathBuf,
        /// Overwrite a ledger that already has rows
        #[arg(long)]
        force: bool,
    },
    /// Regenerate cached findings for one source
    Refresh {
        /// chub, sec2 or uebs
        kind: FindingKind,
        /// JSON file of raw findings
        #[arg(long)]
        input: PathBuf,
        /// Ignore cache freshness
        #[arg(long)]
        force: bool,
        /// JSON object of instance type -> {vcpus, memory_mib}
        #[arg(long)]
        instance_specs: Option<PathBuf>,
        /// JSON object of account id -> friendly name
        #[arg(long)]
        account_names: Option<PathBuf>,
    },
    /// Move cached findings into the tracker by index
    Track {
        kind: FindingKind,
        #[arg(long, value_delimiter = ',', required = true)]
        select: Vec<usize>,
    },
    /// Apply an editor payload ({edited_rows, added_rows}) to a partition
    Edit {
        partition: Partition,
        #[arg(long)]
        edits: PathBuf,
    },
    /// Check that every partition is stored and the partitions are pairwise disjoint
    Validate,
    /// Price an EBS volume
    Cost {
        volume_type: String,
        #[arg(long)]
        size: i64,
        #[arg(long)]
        iops: Option<i64>,
        #[arg(long)]
        throughput: Option<i64>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    costtrack::init_tracing("costtrack");

    let cli = Cli::parse();
    let today = cli.today.unwrap_or_else(|| Local::now().date_naive());

    if let Commands::Cost {
        volume_type,
        size,
        iops,
        throughput,
    } = &cli.command
    {
        let volume_type = VolumeType::from(volume_type.clone());
        println!("{:.2}", monthly_cost(&volume_type, *iops, *throughput, *size)?);
        return Ok(());
    }

    let config = TrackerConfig::from_env()?;
    let store = TrackerStore::for_environment(config.open_store()?, config.environment);

    match cli.command {
        Commands::Show { partition, all_columns } => {
            let rows = store.load_or_empty(partition)?;
            let columns: Vec<&str> = if all_columns {
                COLUMNS.iter().copied().chain(["Name", "RowKey"]).collect()
            } else {
                SUMMARY_COLUMNS.to_vec()
            };
            print_records_table(&rows, &columns);
            println!("{} rows in {}", rows.len(), partition);
        }
        Commands::Archive => {
            let mut session = Session::open(&store)?;
            let archived = session.archive(&store, today)?;
            println!("Archived {} rows from Complete", archived.len());
        }
        Commands::SplitExempt => {
            let ledger = store.load_ledger_for_update()?.ledger;
            let before = ledger.exempt.len();
            let ledger = split_exempt(ledger);
            store.save_ledger(&ledger)?;
            println!("Moved {} rows to Exempt", ledger.exempt.len() - before);
        }
        Commands::ImportLegacy { file, force } => {
            let existing = store.load_ledger()?.ledger;
            if !existing.is_empty() && !force {
                return Err(format!("ledger already holds {} rows; pass --force to replace it", existing.len()).into());
            }
            let records: Vec<TrackerRecord> = serde_json::from_slice(&std::fs::read(&file)?)?;
            let ledger = import_legacy(records);
            store.save_ledger(&ledger)?;
            println!(
                "Imported {} in progress, {} complete, {} exempt",
                ledger.in_progress.len(),
                ledger.complete.len(),
                ledger.exempt.len()
            );
        }
        Commands::Refresh {
            kind,
            input,
            force,
            instance_specs,
            account_names,
        } => {
            let lookup: Box<dyn InstanceSpecLookup> = match instance_specs {
                Some(path) => Box::new(StaticInstanceSpecs::from_json_file(path)?),
                None => Box::new(NoInstanceSpecs),
            };
            let mut normalizer = Normalizer::new(lookup).with_chunk_size(config.chunk_size);
            if let Some(path) = account_names {
                let names: FxHashMap<String, String> = serde_json::from_slice(&std::fs::read(path)?)?;
                normalizer = normalizer.with_account_names(names);
            }
            let cache = FindingsCache::new(&store, &normalizer, Freshness::new(config.stale_window()));
            let source = JsonFileSource::new(input);
            let result = cache.load_or_refresh(kind, &source, Utc::now(), force)?;
            print_records_table(&result.summary, &SUMMARY_COLUMNS);
            for rejection in &result.rejected {
                println!("rejected #{}: {}", rejection.index, rejection.reason);
            }
            println!(
                "{} {} findings ({})",
                result.summary.len(),
                kind,
                if result.refreshed { "regenerated" } else { "cached" }
            );
        }
        Commands::Track { kind, select } => {
            let normalizer = Normalizer::new(Box::new(NoInstanceSpecs));
            let cache = FindingsCache::new(&store, &normalizer, Freshness::new(config.stale_window()));
            let summary: Vec<TrackerRecord> =
                serde_json::from_slice(&store.blobs().get(&cache.summary_key(kind))?)?;
            let mut session = Session::open(&store)?;
            let remaining = session.add_findings(&store, summary, &select, today)?;
            cache.store_summary(kind, &remaining)?;
            println!(
                "Tracked {} findings; {} remain in {}",
                select.len(),
                remaining.len(),
                kind
            );
        }
        Commands::Edit { partition, edits } => {
            let edits: EditSet = serde_json::from_slice(&std::fs::read(edits)?)?;
            let mut session = Session::open(&store)?;
            let stale = session.save_edits(&store, partition, &edits, today)?;
            if stale.is_empty() {
                println!("Saved edits to {}", partition);
            } else {
                println!(
                    "Saved edits to {}; rows {:?} were changed elsewhere and not written",
                    partition, stale
                );
            }
        }
        Commands::Validate => {
            let loaded = store.load_ledger()?;
            if loaded.overlaps.is_empty() && !loaded.is_partial() {
                println!("{} rows, partitions are disjoint", loaded.ledger.len());
            } else {
                for overlap in &loaded.overlaps {
                    println!("overlap: {}", overlap);
                }
                if loaded.is_partial() {
                    for partition in &loaded.missing {
                        println!("missing: {}", store.key(*partition));
                    }
                }
                std::process::exit(1);
            }
        }
        Commands::Cost { .. } => {}
    }

    Ok(())
}
