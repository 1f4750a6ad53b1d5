//! mizdb-maint - archive maintenance from the command line
//!
//! Inspection commands (relations, dupes, plan, unused) open the database
//! read-only. Merge and replace write, recording every change in the
//! change log under the configured actor id. Results are printed as JSON.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mizdb_common::config::MaintConfig;
use mizdb_common::db::{connect_readonly, init_database};
use mizdb_common::Value;
use mizdb_maint::records::fetch_records;
use mizdb_maint::{
    find_duplicates, find_unused, merge, plan_field_updates, replace, Actor, Candidates,
    ChangeLogTable, MergeOptions, Record, Schema,
};

/// Command-line arguments for mizdb-maint
#[derive(Parser, Debug)]
#[command(name = "mizdb-maint")]
#[command(about = "Maintenance tools for the MIZDB archive database")]
#[command(version)]
struct Args {
    /// Archive database file (overrides MIZDB_DATABASE and the config file)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the relations of a table
    Relations { table: String },

    /// Find groups of records sharing field values
    Dupes {
        table: String,
        /// Fields to compare
        #[arg(long, value_delimiter = ',', required = true)]
        by: Vec<String>,
        /// Extra fields to show for each record
        #[arg(long, value_delimiter = ',')]
        show: Vec<String>,
        /// Only consider these records
        #[arg(long, value_delimiter = ',')]
        keys: Vec<String>,
    },

    /// Show which donor values a merge would copy and where donors disagree
    Plan {
        table: String,
        survivor: String,
        #[arg(required = true)]
        donors: Vec<String>,
    },

    /// Merge donor records into a survivor
    Merge {
        table: String,
        survivor: String,
        #[arg(required = true)]
        donors: Vec<String>,
        /// Leave the survivor's fields untouched
        #[arg(long, conflicts_with = "set")]
        no_expand: bool,
        /// Explicit survivor update (field=value); replaces automatic expansion
        #[arg(long = "set", value_parser = parse_assignment)]
        set: Vec<(String, String)>,
    },

    /// List records referenced at most LIMIT times per relation
    Unused {
        table: String,
        #[arg(long, default_value_t = 0)]
        limit: u32,
    },

    /// Replace a record with others in all its many-to-many relations
    Replace {
        table: String,
        record: String,
        #[arg(required = true)]
        replacements: Vec<String>,
    },
}

fn parse_assignment(arg: &str) -> std::result::Result<(String, String), String> {
    match arg.split_once('=') {
        Some((field, value)) if !field.is_empty() => Ok((field.to_string(), value.to_string())),
        _ => Err(format!("expected field=value, got '{}'", arg)),
    }
}

fn keys(table: &str, args: &[String]) -> Vec<Record> {
    args.iter()
        .map(|arg| Record::key(table, Value::from_cli_arg(arg)))
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config warnings are emitted before the configured filter is known
    let bootstrap = tracing_subscriber::fmt().with_writer(std::io::stderr).finish();
    let config = tracing::subscriber::with_default(bootstrap, || {
        MaintConfig::resolve(args.database.as_deref(), args.config.as_deref())
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Database path: {}", config.database.display());
    let actor = Actor::new(config.actor_id);

    match args.command {
        Command::Relations { table } => {
            let pool = connect_readonly(&config.database).await?;
            let mut conn = pool.acquire().await?;
            let schema = Schema::load(&mut conn).await?;
            print_json(&schema.relations_of(&table, true, true)?)?;
        }

        Command::Dupes { table, by, show, keys } => {
            let pool = connect_readonly(&config.database).await?;
            let mut conn = pool.acquire().await?;
            let schema = Schema::load(&mut conn).await?;
            let record_type = schema.record_type(&table)?;

            let candidates = if keys.is_empty() {
                Candidates::All
            } else {
                Candidates::Keys(keys.iter().map(|k| Value::from_cli_arg(k)).collect())
            };
            let groups = find_duplicates(&mut conn, record_type, &candidates, &by, &show).await?;
            info!("Found {} duplicate groups in {}", groups.len(), table);
            print_json(&groups)?;
        }

        Command::Plan { table, survivor, donors } => {
            let pool = connect_readonly(&config.database).await?;
            let mut conn = pool.acquire().await?;
            let schema = Schema::load(&mut conn).await?;
            let record_type = schema.record_type(&table)?;

            let survivor_key = Value::from_cli_arg(&survivor);
            let survivor = fetch_records(&mut conn, record_type, std::slice::from_ref(&survivor_key))
                .await?
                .pop()
                .ok_or_else(|| anyhow!("{} #{} not found", table, survivor_key))?;

            // Keep donors in the order given
            let mut donor_records = Vec::new();
            for donor in keys(&table, &donors) {
                let found = fetch_records(&mut conn, record_type, std::slice::from_ref(&donor.pk)).await?;
                donor_records.extend(found);
            }

            print_json(&plan_field_updates(record_type, &survivor, &donor_records))?;
        }

        Command::Merge { table, survivor, donors, no_expand, set } => {
            let pool = init_database(&config.database)
                .await
                .context("Failed to open database for writing")?;

            let options = if no_expand {
                MergeOptions::without_expansion()
            } else if set.is_empty() {
                MergeOptions::default()
            } else {
                let updates: BTreeMap<String, Value> = set
                    .into_iter()
                    .map(|(field, value)| (field, Value::from_cli_arg(&value)))
                    .collect();
                MergeOptions::with_updates(updates)
            };

            let survivor = Record::key(&table, Value::from_cli_arg(&survivor));
            let result = merge(
                &pool,
                &ChangeLogTable,
                &actor,
                &survivor,
                &keys(&table, &donors),
                options,
            )
            .await?;
            print_json(&result)?;
        }

        Command::Unused { table, limit } => {
            let pool = connect_readonly(&config.database).await?;
            let mut conn = pool.acquire().await?;
            let schema = Schema::load(&mut conn).await?;
            print_json(&find_unused(&mut conn, &schema, &table, limit).await?)?;
        }

        Command::Replace { table, record, replacements } => {
            let pool = init_database(&config.database)
                .await
                .context("Failed to open database for writing")?;

            let record = Record::key(&table, Value::from_cli_arg(&record));
            let changed = replace(
                &pool,
                &ChangeLogTable,
                &actor,
                &record,
                &keys(&table, &replacements),
            )
            .await?;
            print_json(&changed)?;
        }
    }

    Ok(())
}
