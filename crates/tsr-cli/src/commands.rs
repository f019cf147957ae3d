use anyhow::Context;
use colored::Colorize;
use serde_json::{json, Value};
use tsr_commitlog::{CommitLog, CommitRecord, LogConfig, LogSnapshot, FREE_SLOT};
use tsr_store::StoreConfig;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Inspect(args) => cmd_inspect(args, &cli.format),
        Command::Records(args) => cmd_records(args, &cli.format),
        Command::Config(args) => cmd_config(args),
    }
}

fn snapshot(args: &LogArgs) -> anyhow::Result<LogSnapshot> {
    let config = LogConfig::new(&args.dir, args.project.clone());
    CommitLog::inspect(&config)
        .with_context(|| format!("cannot read commit log for project {}", args.project))
}

fn cmd_inspect(args: LogArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let snap = snapshot(&args)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&header_json(&snap))?),
        OutputFormat::Text => print_header(&args.project, &snap),
    }
    Ok(())
}

fn cmd_records(args: RecordsArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let snap = snapshot(&args.log)?;
    let records = select_records(&snap, args.since, args.limit);
    match format {
        OutputFormat::Json => {
            let rows: Vec<Value> = records.iter().map(|r| record_json(r)).collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Text if records.is_empty() => println!("No records in the ring."),
        OutputFormat::Text => {
            for record in records {
                println!(
                    "{}  {}  +{} ~{} -{}",
                    format!("g#{}", record.generation).yellow(),
                    record.source.short_id().dimmed(),
                    record.added.len().to_string().green(),
                    record.updated.len().to_string().cyan(),
                    record.deleted.len().to_string().red(),
                );
            }
        }
    }
    Ok(())
}

fn cmd_config(args: ConfigArgs) -> anyhow::Result<()> {
    let config = match &args.file {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    print!("{}", config.to_toml_string()?);
    Ok(())
}

fn print_header(project: &str, snap: &LogSnapshot) {
    let meta = &snap.metadata;
    println!("Project {}", project.bold());
    println!("  Generation: {}", meta.current_generation.to_string().yellow().bold());
    println!(
        "  Ring: offset {} length {} padding {} (capacity {}, free {})",
        meta.offset,
        meta.length,
        meta.padding,
        snap.capacity,
        meta.free_space(snap.capacity).to_string().green()
    );
    println!("  Records: {}", snap.entries.len());
    for (slot, seen) in meta.slots.iter().enumerate() {
        if *seen == FREE_SLOT {
            println!("  slot {}: {}", slot, "free".dimmed());
        } else if meta.is_master(slot) {
            println!("  slot {}: seen {} {}", slot, seen, "(master)".cyan());
        } else {
            println!("  slot {}: seen {}", slot, seen);
        }
    }
}

fn header_json(snap: &LogSnapshot) -> Value {
    json!({
        "capacity": snap.capacity,
        "free": snap.metadata.free_space(snap.capacity),
        "records": snap.entries.len(),
        "metadata": snap.metadata,
    })
}

fn record_json(record: &CommitRecord) -> Value {
    json!({
        "generation": record.generation,
        "source": record.source.to_string(),
        "added": record.added.len(),
        "updated": record.updated.len(),
        "deleted": record.deleted.len(),
    })
}

fn select_records(snap: &LogSnapshot, since: Option<i64>, limit: Option<usize>) -> Vec<&CommitRecord> {
    let since = since.unwrap_or(i64::MIN);
    let newer = snap
        .entries
        .iter()
        .map(|entry| &entry.record)
        .filter(|record| record.generation > since);
    match limit {
        Some(n) => newer.take(n).collect(),
        None => newer.collect(),
    }
}
