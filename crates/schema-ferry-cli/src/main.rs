//! schema-ferry CLI - analyze, map, and migrate JSON-lines tables.

use clap::{Parser, Subcommand};
use schema_ferry::{
    ApiError, Config, DestinationDescriptor, DriverCatalog, ExecuteRequest, FieldMapping,
    HistoryQuery, LedgerBackendKind, MigrateError, Migration, MigrationService, MigrationStatus,
    SourceDescriptor, TableSchema,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use uuid::Uuid;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Ledger file used when neither `--ledger` nor the config names one.
const DEFAULT_LEDGER: &str = ".schema-ferry/ledger.json";

#[derive(Parser)]
#[command(name = "schema-ferry")]
#[command(about = "Schema mapping and resumable table migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the ledger file recording migrations
    #[arg(long)]
    ledger: Option<PathBuf>,

    /// Output JSON results to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Infer the schema of a JSON-lines source file
    Analyze {
        /// Source file (one JSON object per line)
        source: PathBuf,

        /// Table name [default: file stem]
        #[arg(long)]
        table: Option<String>,
    },

    /// Suggest field mappings and DDL for a destination table
    Suggest {
        /// Source file (one JSON object per line)
        source: PathBuf,

        /// Destination table name
        #[arg(long)]
        destination_table: String,

        /// Use this schema (JSON) instead of analyzing the source
        #[arg(long)]
        schema: Option<PathBuf>,
    },

    /// Start a migration and wait for it to finish
    Run {
        /// Source file (one JSON object per line)
        source: PathBuf,

        /// Destination directory
        #[arg(long)]
        destination: PathBuf,

        /// Destination table name
        #[arg(long)]
        destination_table: String,

        /// Use these mappings (JSON array) instead of the suggested ones
        #[arg(long)]
        mappings: Option<PathBuf>,

        /// Skip issuing CREATE TABLE before the first batch
        #[arg(long)]
        no_create_table: bool,

        /// Free-text description stored with the migration
        #[arg(long)]
        description: Option<String>,

        /// Who started the migration
        #[arg(long)]
        created_by: Option<String>,
    },

    /// Resume an interrupted migration, or every one when no id is given
    Resume {
        /// Migration id
        id: Option<Uuid>,
    },

    /// Show the status of a migration
    Status {
        /// Migration id
        id: Uuid,
    },

    /// List migrations, newest first
    History {
        /// Page size (1-100)
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Entries to skip
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Only migrations with this status
        #[arg(long)]
        status: Option<String>,

        /// Snapshot returned by a previous page
        #[arg(long)]
        snapshot: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let output_json = cli.output_json;
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            if output_json {
                match serde_json::to_string_pretty(&e) {
                    Ok(json) => println!("{}", json),
                    Err(_) => eprintln!("Error: {}", e.detail),
                }
            } else {
                eprintln!("Error: {}", e.detail);
                for problem in &e.problems {
                    eprintln!("  - {}", problem);
                }
            }
            ExitCode::from(e.exit_code())
        }
    }
}

/// Run the selected command. `Ok(false)` means a migration ended unsuccessfully.
async fn run(cli: Cli) -> Result<bool, ApiError> {
    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| ApiError::from(MigrateError::Config(e)))?;

    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => Config::default(),
    };
    config.ledger = resolve_ledger(&config, cli.ledger.as_deref());

    let service = MigrationService::open(&config, Arc::new(DriverCatalog::new())).await?;

    match cli.command {
        Commands::Analyze { source, table } => {
            let schema = service.analyze_source(&source_descriptor(&source, table)).await?;
            if cli.output_json {
                print_json(&schema)?;
            } else {
                print_schema(&schema);
            }
            Ok(true)
        }

        Commands::Suggest {
            source,
            destination_table,
            schema,
        } => {
            let schema = match schema {
                Some(path) => read_json::<TableSchema>(&path)?,
                None => service.analyze_source(&source_descriptor(&source, None)).await?,
            };
            let suggestion = service.suggest_mapping(&schema, &destination_table)?;
            if cli.output_json {
                print_json(&suggestion)?;
            } else {
                println!("Mappings for {} -> {}:", schema.full_name(), destination_table);
                for m in &suggestion.mappings {
                    print_mapping(m);
                }
                println!("\nDDL:\n  {}", suggestion.ddl);
                if !suggestion.warnings.is_empty() {
                    println!("\nWarnings:");
                    for w in &suggestion.warnings {
                        println!("  {}", w);
                    }
                }
            }
            Ok(true)
        }

        Commands::Run {
            source,
            destination,
            destination_table,
            mappings,
            no_create_table,
            description,
            created_by,
        } => {
            let source = source_descriptor(&source, None);
            let schema = service.analyze_source(&source).await?;
            let mappings = match mappings {
                Some(path) => read_json::<Vec<FieldMapping>>(&path)?,
                None => {
                    let suggestion = service.suggest_mapping(&schema, &destination_table)?;
                    for w in &suggestion.warnings {
                        warn!("{}", w);
                    }
                    suggestion.mappings
                }
            };

            let mut request = ExecuteRequest::new(
                schema,
                mappings,
                source,
                DestinationDescriptor::jsonl(destination.to_string_lossy(), destination_table),
            );
            request.create_table = !no_create_table;
            request.description = description;
            request.created_by = created_by;

            let shutdown = setup_signal_handler();
            let accepted = service.execute(request).await?;
            info!("Started migration {}", accepted.migration_id);
            drive(&service, &[accepted.migration_id], shutdown, cli.output_json).await
        }

        Commands::Resume { id } => {
            let ids = match id {
                Some(id) => {
                    let existing = service.status(&id)?;
                    service.execute(ExecuteRequest::resume(id, &existing)).await?;
                    vec![id]
                }
                None => service.recover()?,
            };
            if ids.is_empty() {
                println!("Nothing to resume");
                return Ok(true);
            }
            info!("Resuming {} migration(s)", ids.len());
            drive(&service, &ids, setup_signal_handler(), cli.output_json).await
        }

        Commands::Status { id } => {
            let migration = service.status(&id)?;
            if cli.output_json {
                print_json(&migration)?;
            } else {
                print_migration(&migration);
            }
            Ok(true)
        }

        Commands::History {
            limit,
            offset,
            status,
            snapshot,
        } => {
            let mut query = HistoryQuery::page(limit, offset);
            if let Some(status) = status {
                query = query.with_status(parse_status(&status)?);
            }
            if let Some(snapshot) = snapshot {
                query = query.at_snapshot(snapshot);
            }
            let page = service.history(&query);
            if cli.output_json {
                print_json(&page)?;
            } else {
                println!(
                    "Migrations {}-{} of {} (snapshot {})",
                    (offset + 1).min(page.total),
                    (offset + page.migrations.len()).min(page.total),
                    page.total,
                    page.snapshot
                );
                for m in &page.migrations {
                    println!(
                        "  {}  {:<9}  {}  {} -> {}  {}/{}",
                        m.id,
                        m.status,
                        m.created_at.format("%Y-%m-%d %H:%M:%S"),
                        m.source,
                        m.destination,
                        m.progress.processed_records,
                        total_label(m)
                    );
                }
            }
            Ok(true)
        }
    }
}

/// Wait for `ids` to finish, or shut down gracefully on a signal.
async fn drive(
    service: &MigrationService,
    ids: &[Uuid],
    shutdown: CancellationToken,
    output_json: bool,
) -> Result<bool, ApiError> {
    let mut finished = Vec::with_capacity(ids.len());
    for id in ids {
        tokio::select! {
            result = service.wait(id) => finished.push(result?),
            _ = shutdown.cancelled() => {
                service.shutdown().await;
                eprintln!("Interrupted. Resume with: schema-ferry resume {}", id);
                return Ok(false);
            }
        }
    }

    let all_succeeded = finished
        .iter()
        .all(|m| m.status == MigrationStatus::Succeeded);
    if output_json {
        if let [single] = finished.as_slice() {
            print_json(single)?;
        } else {
            print_json(&finished)?;
        }
    } else {
        for m in &finished {
            let status_msg = if m.status == MigrationStatus::Succeeded {
                "Migration completed!"
            } else {
                "Migration did not complete."
            };
            println!("\n{}", status_msg);
            print_migration(m);
        }
    }
    Ok(all_succeeded)
}

fn resolve_ledger(config: &Config, flag: Option<&Path>) -> schema_ferry::LedgerConfig {
    let mut ledger = config.ledger.clone();
    if let Some(path) = flag {
        ledger.backend = LedgerBackendKind::File;
        ledger.path = Some(path.to_path_buf());
    } else if ledger.backend == LedgerBackendKind::Memory {
        // A memory ledger cannot serve status or resume across invocations.
        ledger.backend = LedgerBackendKind::File;
        ledger.path = Some(PathBuf::from(DEFAULT_LEDGER));
    }
    ledger
}

fn source_descriptor(path: &Path, table: Option<String>) -> SourceDescriptor {
    let table = table.unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source".to_string())
    });
    SourceDescriptor::jsonl(path.to_string_lossy(), table)
}

fn parse_status(s: &str) -> Result<MigrationStatus, ApiError> {
    Ok(schema_ferry::state::str_to_status(&s.to_lowercase())?)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ApiError> {
    let content = std::fs::read_to_string(path).map_err(MigrateError::from)?;
    Ok(serde_json::from_str(&content).map_err(MigrateError::from)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), ApiError> {
    let json = serde_json::to_string_pretty(value).map_err(MigrateError::from)?;
    println!("{}", json);
    Ok(())
}

fn print_schema(schema: &TableSchema) {
    match schema.row_count {
        Some(rows) => println!("Table: {} ({} rows)", schema.full_name(), rows),
        None => println!("Table: {}", schema.full_name()),
    }
    for c in &schema.columns {
        let mut flags = Vec::new();
        if !c.nullable {
            flags.push("NOT NULL".to_string());
        }
        if c.primary_key {
            flags.push("PRIMARY KEY".to_string());
        }
        if let Some(len) = c.max_length {
            flags.push(format!("max {}", len));
        }
        println!("  {:<24} {:<12} {}", c.name, c.data_type, flags.join(", "));
    }
}

fn print_mapping(m: &FieldMapping) {
    if m.skip {
        println!("  {:<24} (skipped)", m.source_field);
        return;
    }
    let transformation = m
        .transformation
        .as_deref()
        .map(|t| format!(" via {}", t))
        .unwrap_or_default();
    println!(
        "  {:<24} -> {} {}{}",
        m.source_field, m.destination_field, m.destination_type, transformation
    );
}

fn total_label(m: &Migration) -> String {
    if m.progress.total_known {
        m.progress.total_records.to_string()
    } else {
        "?".to_string()
    }
}

fn print_migration(m: &Migration) {
    println!("  Migration ID: {}", m.id);
    println!("  Status: {}", m.status);
    println!("  Source: {}", m.source);
    println!("  Destination: {}", m.destination);
    println!(
        "  Rows: {}/{} ({:.2}%)",
        m.progress.processed_records,
        total_label(m),
        m.progress.percentage
    );
    if m.row_error_count > 0 {
        println!("  Row errors: {}", m.row_error_count);
        for e in &m.row_errors {
            println!("    row {} column {}: {}", e.row, e.column, e.message);
        }
    }
    if let Some(ref err) = m.error {
        println!("  Error: {}", err);
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so `--output-json` output stays parseable.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Stopping after the current batch...", name);
                    token.cancel();
                });
            }
            Err(e) => warn!("Failed to install {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current batch...");
            token.cancel();
        }
    });

    cancel_token
}
