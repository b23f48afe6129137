use clap::{Parser, Subcommand};
use payroll_ingest::runner::{
    DatabaseArgs, Format, IngestArgs, IngestStatus, InvalidDatePolicy, cleanup_registry,
    dump_year, init_tracing, lookup_employee, registry_stats, run_ingest,
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Clone)]
#[command(version, about = "Ingest payroll spreadsheets into year-partitioned tables")]
struct Args {
    /// Database URL (postgres://... or sqlite:...)
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Maximum pooled connections
    #[arg(long, default_value = "4")]
    max_connections: u32,

    /// Quiet mode - only warnings and the command's JSON output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Subcommand)]
enum Command {
    /// Ingest a payroll export (CSV, TSV or JSON array)
    Ingest {
        /// Path to the export
        source: PathBuf,

        /// File format (csv, tsv, json, xlsx) - auto-detected from extension if not specified
        #[arg(short, long)]
        format: Option<String>,

        /// Rows with an unparseable month_year: drop them, or reject the whole upload
        #[arg(long, default_value = "drop")]
        invalid_dates: String,
    },

    /// Show one employee from the master registry
    Employee {
        person_no: String,
        personnel_area: String,
    },

    /// Registry totals, duplicates and recent sample rows
    RegistryStats,

    /// Remove stale registry duplicates, keeping the latest month_year
    RegistryCleanup,

    /// Print every row of one year's salary table
    Dump { year: i32 },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.quiet);

    let database = DatabaseArgs {
        database_url: args.database_url,
        max_connections: args.max_connections,
    };

    match args.command {
        Command::Ingest {
            source,
            format,
            invalid_dates,
        } => {
            let format = format.as_deref().map(Format::parse).transpose()?;
            let invalid_dates = InvalidDatePolicy::parse(&invalid_dates)?;

            let report = run_ingest(IngestArgs {
                database,
                source,
                format,
                invalid_dates,
            })
            .await?;
            print_json(&report)?;

            if report.status == IngestStatus::Partial {
                std::process::exit(2);
            }
        }
        Command::Employee {
            person_no,
            personnel_area,
        } => match lookup_employee(&database, &person_no, &personnel_area).await? {
            Some(employee) => print_json(&employee)?,
            None => anyhow::bail!(
                "Employee {} in area {} not found",
                person_no,
                personnel_area
            ),
        },
        Command::RegistryStats => print_json(&registry_stats(&database).await?)?,
        Command::RegistryCleanup => print_json(&cleanup_registry(&database).await?)?,
        Command::Dump { year } => print_json(&dump_year(&database, year).await?)?,
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
