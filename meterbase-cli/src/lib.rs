//! # meterbase CLI
//!
//! Operator commands over a JSON dump of the table store: compile sample
//! queries, run raw scans, sweep expired data, and migrate legacy keys.
//! Commands that change data write the dump back in place.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use meterbase_core::{
    config::{Config, LogFormat, LoggingConfig},
    traits::{Connection, ScanRequest},
    types::{SampleFilter, Timestamp, TimestampOp},
    value::{Metadata, Value},
};
use meterbase_storage::{
    migrate_tables, query::make_sample_query_from_filter, schema, AlarmStore, Dump,
    MemoryConnection, MeteringStore,
};

#[derive(Parser, Debug)]
#[command(name = "meterbase")]
#[command(about = "meterbase - metering storage over column-family tables")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the scan a sample filter compiles to
    CompileSampleQuery(SampleQueryArgs),
    /// Scan one table of a dump
    Scan(ScanArgs),
    /// Delete expired samples and alarm history from a dump
    Expire(ExpireArgs),
    /// Rewrite legacy row keys and meter qualifiers in a dump
    Migrate(MigrateArgs),
}

#[derive(Args, Debug, Default)]
pub struct SampleQueryArgs {
    #[arg(long)]
    pub meter: Option<String>,
    #[arg(long)]
    pub user: Option<String>,
    #[arg(long)]
    pub project: Option<String>,
    #[arg(long)]
    pub resource: Option<String>,
    #[arg(long)]
    pub source: Option<String>,
    #[arg(long)]
    pub message_id: Option<String>,
    #[arg(long, value_parser = parse_timestamp)]
    pub start: Option<Timestamp>,
    #[arg(long, value_parser = TimestampOp::from_str)]
    pub start_op: Option<TimestampOp>,
    #[arg(long, value_parser = parse_timestamp)]
    pub end: Option<Timestamp>,
    #[arg(long, value_parser = TimestampOp::from_str)]
    pub end_op: Option<TimestampOp>,
    /// Metadata equality, `metadata.<path>=<value>`; repeatable
    #[arg(long = "meta", value_parser = parse_meta)]
    pub metaquery: Vec<(String, String)>,
    /// Fail unless `--meter` is given
    #[arg(long)]
    pub require_meter: bool,
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    #[arg(long)]
    pub dump: PathBuf,
    /// Logical table name; the configured prefix is applied
    #[arg(long)]
    pub table: String,
    #[arg(long)]
    pub filter: Option<String>,
    #[arg(long)]
    pub start: Option<String>,
    #[arg(long)]
    pub stop: Option<String>,
    #[arg(long = "column")]
    pub columns: Vec<String>,
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ExpireArgs {
    #[arg(long)]
    pub dump: PathBuf,
    /// Cut-off instant; defaults to now minus the configured TTLs
    #[arg(long, value_parser = parse_timestamp)]
    pub before: Option<Timestamp>,
}

#[derive(Args, Debug)]
pub struct MigrateArgs {
    #[arg(long)]
    pub dump: PathBuf,
    #[arg(long = "table", default_values_t = [schema::RESOURCE_TABLE.to_string(), schema::METER_TABLE.to_string()])]
    pub tables: Vec<String>,
}

/// Accepts RFC 3339 or a naive `YYYY-MM-DDTHH:MM:SS[.ffffff]` taken as UTC
pub fn parse_timestamp(text: &str) -> std::result::Result<Timestamp, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.naive_utc());
    }
    NaiveDateTime::from_str(text).map_err(|e| format!("invalid timestamp '{}': {}", text, e))
}

fn parse_meta(text: &str) -> std::result::Result<(String, String), String> {
    text.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", text))
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // A second init (tests) keeps the first subscriber
    let _ = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Run one command and return what it prints
pub fn run(cli: Cli) -> Result<String> {
    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.logging);

    match cli.command {
        Command::CompileSampleQuery(args) => compile_sample_query(args),
        Command::Scan(args) => scan(&config, args),
        Command::Expire(args) => expire(&config, args),
        Command::Migrate(args) => migrate(&config, args),
    }
}

fn compile_sample_query(args: SampleQueryArgs) -> Result<String> {
    let metaquery: Metadata = args
        .metaquery
        .into_iter()
        .map(|(k, v)| (k, Value::from(v)))
        .collect();
    let filter = SampleFilter {
        user: args.user,
        project: args.project,
        resource: args.resource,
        meter: args.meter,
        source: args.source,
        message_id: args.message_id,
        start_timestamp: args.start,
        start_timestamp_op: args.start_op,
        end_timestamp: args.end,
        end_timestamp_op: args.end_op,
        metaquery,
    };

    let query = make_sample_query_from_filter(&filter, args.require_meter)?;
    let out = json!({
        "filter": query.filter.map(|f| f.to_string()),
        "start_row": query.start_row,
        "end_row": query.end_row,
        "columns": query.columns,
    });
    Ok(serde_json::to_string_pretty(&out)?)
}

fn load_dump(path: &Path) -> Result<MemoryConnection> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let dump = Dump::from_json(&text).with_context(|| format!("parsing {}", path.display()))?;
    let conn = MemoryConnection::new();
    conn.import(&dump)?;
    info!("Loaded {} rows from {}", dump.row_count(), path.display());
    Ok(conn)
}

fn save_dump(conn: &MemoryConnection, path: &Path) -> Result<()> {
    let dump = conn.export()?;
    fs::write(path, dump.to_json()?).with_context(|| format!("writing {}", path.display()))?;
    info!("Wrote {} rows to {}", dump.row_count(), path.display());
    Ok(())
}

fn scan(config: &Config, args: ScanArgs) -> Result<String> {
    let conn = load_dump(&args.dump)?;
    let table = conn.table(&config.storage.table_name(&args.table))?;
    let request = ScanRequest::new()
        .filter(args.filter)
        .row_start(args.start)
        .row_stop(args.stop)
        .columns(args.columns)
        .limit(args.limit);

    let mut lines = Vec::new();
    for row in table.scan(request)? {
        let (key, cells) = row?;
        let columns: serde_json::Map<String, serde_json::Value> = cells
            .iter()
            .map(|(col, cell)| (col.clone(), String::from_utf8_lossy(cell).into_owned().into()))
            .collect();
        let line = json!({ "row": String::from_utf8_lossy(&key), "columns": columns });
        lines.push(serde_json::to_string(&line)?);
    }
    Ok(lines.join("\n"))
}

fn has_tables(conn: &MemoryConnection, config: &Config, tables: &[&str]) -> bool {
    let present = conn.table_names();
    tables
        .iter()
        .all(|t| present.contains(&config.storage.table_name(t)))
}

fn expire(config: &Config, args: ExpireArgs) -> Result<String> {
    let conn = load_dump(&args.dump)?;
    let handle: Arc<dyn Connection> = Arc::new(conn.clone());
    let now = Utc::now().naive_utc();
    let cutoff = |ttl: Option<std::time::Duration>| -> Result<Option<Timestamp>> {
        match (args.before, ttl) {
            (Some(before), _) => Ok(Some(before)),
            (None, Some(ttl)) => Ok(Some(now - chrono::Duration::from_std(ttl)?)),
            (None, None) => Ok(None),
        }
    };

    let mut samples = 0;
    let mut history = 0;
    if has_tables(&conn, config, &[schema::RESOURCE_TABLE, schema::METER_TABLE]) {
        if let Some(threshold) = cutoff(config.retention.metering_ttl())? {
            samples = MeteringStore::new(handle.clone(), config.storage.clone())
                .clear_metering_data_before(threshold)?;
        }
    }
    if has_tables(&conn, config, &[schema::ALARM_HISTORY_TABLE]) {
        if let Some(threshold) = cutoff(config.retention.alarm_history_ttl())? {
            history = AlarmStore::new(handle, config.storage.clone())
                .clear_alarm_history_before(threshold)?;
        }
    }

    save_dump(&conn, &args.dump)?;
    Ok(format!("expired {} samples and {} alarm history entries", samples, history))
}

fn migrate(config: &Config, args: MigrateArgs) -> Result<String> {
    if args.tables.is_empty() {
        bail!("no tables to migrate");
    }
    let conn = load_dump(&args.dump)?;
    let tables: Vec<&str> = args.tables.iter().map(String::as_str).collect();
    let report = migrate_tables(&conn, &config.storage, &tables)?;
    save_dump(&conn, &args.dump)?;
    Ok(format!(
        "migrated {} meter rows and {} resource columns{}",
        report.rows_rewritten,
        report.columns_rewritten,
        if report.skipped_tables.is_empty() {
            String::new()
        } else {
            format!(" (skipped: {})", report.skipped_tables.join(", "))
        }
    ))
}
