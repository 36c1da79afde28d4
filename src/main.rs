use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info, warn};

use partner_tables::config::AppConfig;
use partner_tables::db::{SqliteStorage, StorageAdapter};
use partner_tables::engine::PartnerTable;
use partner_tables::events::TracingObserver;
use partner_tables::location::LocationTable;
use partner_tables::logging::{init_from_config, OperationTimer};
use partner_tables::metadata::{Intercept, MetadataRegistry};
use partner_tables::models::{ListQuery, Operator, Row, SortOrder, Value};
use partner_tables::repository::SqliteContentSource;
use partner_tables::version::SqliteVersionMarkers;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Extra configuration file, layered over config/default and config/local
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database URL, overrides configuration
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install or upgrade the location table schema
    Install,
    /// Insert a location row
    Insert {
        /// Column assignment, e.g. --set city=Reno
        #[arg(long = "set", value_parser = parse_assignment)]
        values: Vec<(String, Value)>,
    },
    /// Show a row by id
    Get { id: i64 },
    /// Show the first row where a column has a value
    GetBy { column: String, value: String },
    /// Update a row by id
    Update {
        id: i64,

        /// Column assignment, e.g. --set zipcode=89501
        #[arg(long = "set", value_parser = parse_assignment, required = true)]
        values: Vec<(String, Value)>,
    },
    /// Delete a row by id
    Delete { id: i64 },
    /// List rows
    List {
        /// Equality filter, e.g. --where state=NV
        #[arg(long = "where", value_parser = parse_assignment)]
        filters: Vec<(String, Value)>,

        /// Column to sort by
        #[arg(long)]
        order_by: Option<String>,

        /// Sort descending
        #[arg(long)]
        desc: bool,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        offset: Option<usize>,
    },
    /// Read an item's metadata through the partner table
    MetaGet {
        item_id: i64,

        /// Metadata key, defaults to the location table's key
        #[arg(long)]
        key: Option<String>,
    },
    /// Write an item's metadata through the partner table
    MetaSet {
        item_id: i64,

        /// Metadata key, defaults to the location table's key
        #[arg(long)]
        key: Option<String>,

        /// Column assignment, e.g. --set city=Reno
        #[arg(long = "set", value_parser = parse_assignment, required = true)]
        values: Vec<(String, Value)>,
    },
    /// Delete an item's metadata through the partner table
    MetaDelete {
        item_id: i64,

        /// Metadata key, defaults to the location table's key
        #[arg(long)]
        key: Option<String>,
    },
    /// Add a content item to the items table
    AddItem {
        #[arg(long, default_value = "post")]
        item_type: String,

        #[arg(long, default_value = "")]
        title: String,
    },
    /// Fetch content items, joined with their location rows
    Fetch {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Content items located in a zipcode
    ByZipcode { zipcode: String },
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Insert { .. } => "insert",
            Self::Get { .. } => "get",
            Self::GetBy { .. } => "get-by",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::List { .. } => "list",
            Self::MetaGet { .. } => "meta-get",
            Self::MetaSet { .. } => "meta-set",
            Self::MetaDelete { .. } => "meta-delete",
            Self::AddItem { .. } => "add-item",
            Self::Fetch { .. } => "fetch",
            Self::ByZipcode { .. } => "by-zipcode",
        }
    }
}

fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let mut config = AppConfig::load_from(cli.config.as_deref())?;
    config.database.url = cli.database.clone().unwrap_or_else(|| config.get_database_url());
    config.validate()?;

    // Initialize logging
    let _guard = init_from_config(&config.logging, &config.get_log_level())?;
    info!("Starting partner-tables");

    let storage: Arc<dyn StorageAdapter> = Arc::new(
        SqliteStorage::from_config(&config.database)
            .with_context(|| format!("Failed to open database {}", config.database.url))?,
    );
    let markers = Arc::new(SqliteVersionMarkers::new(Arc::clone(&storage))?);
    let content = Arc::new(SqliteContentSource::new(
        Arc::clone(&storage),
        config.content.items_table.clone(),
    ));
    content.ensure_table()?;

    let table = Arc::new(
        PartnerTable::new(LocationTable, storage, content.clone(), markers, &config.tables)?
            .with_observer(Arc::new(TracingObserver)),
    );
    let status = table.ensure_schema().context("Failed to install the location table")?;
    debug!(?status, table = table.table_name(), "Schema checked");

    let mut registry = MetadataRegistry::new();
    registry.register(table.clone());

    let timer = OperationTimer::new(cli.command.name());
    match cli.command {
        Commands::Install => print_json(&status)?,
        Commands::Insert { values } => {
            let id = table.insert(values.into_iter().collect())?;
            print_json(&serde_json::json!({ "id": id }))?;
        },
        Commands::Get { id } => print_json(&table.get(id)?)?,
        Commands::GetBy { column, value } => print_json(&table.get_by(&column, Value::parse_literal(&value))?)?,
        Commands::Update { id, values } => print_json(&table.update(id, values.into_iter().collect())?)?,
        Commands::Delete { id } => print_json(&table.delete(id)?)?,
        Commands::List {
            filters,
            order_by,
            desc,
            limit,
            offset,
        } => {
            let mut query = ListQuery::new();
            for (column, value) in filters {
                query = query.filter(column, Operator::Equal, value);
            }
            if let Some(column) = order_by {
                query = query.order_by(column, if desc { SortOrder::Desc } else { SortOrder::Asc });
            }
            if let Some(limit) = limit {
                query = query.limit(limit);
            }
            if let Some(offset) = offset {
                query = query.offset(offset);
            }
            print_json(&table.search(&query)?)?;
        },
        Commands::MetaGet { item_id, key } => {
            let key = key.unwrap_or_else(|| table.meta_key().to_string());
            print_intercept(&key, registry.read(item_id, &key)?)?;
        },
        Commands::MetaSet { item_id, key, values } => {
            let key = key.unwrap_or_else(|| table.meta_key().to_string());
            let value: Row = values.into_iter().collect();
            print_intercept(&key, registry.write(item_id, &key, value)?)?;
        },
        Commands::MetaDelete { item_id, key } => {
            let key = key.unwrap_or_else(|| table.meta_key().to_string());
            print_intercept(&key, registry.delete(item_id, &key)?)?;
        },
        Commands::AddItem { item_type, title } => {
            let id = content.add_item(&item_type, &title)?;
            print_json(&serde_json::json!({ "id": id }))?;
        },
        Commands::Fetch { ids } => print_json(&table.fetch_items(&ids)?)?,
        Commands::ByZipcode { zipcode } => print_json(&table.items_by_zipcode(&zipcode)?)?,
    }
    timer.finish();

    Ok(())
}

/// Parse `column=value`; the value is read as an integer, float or text
fn parse_assignment(raw: &str) -> std::result::Result<(String, Value), String> {
    let (column, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected column=value, got `{raw}`"))?;
    let column = column.trim();
    if column.is_empty() {
        return Err(format!("missing column name in `{raw}`"));
    }
    Ok((column.to_string(), Value::parse_literal(value)))
}

fn print_intercept<T: Serialize>(key: &str, intercept: Intercept<T>) -> Result<()> {
    match intercept {
        Intercept::Handled(value) => print_json(&value),
        Intercept::Pass => {
            warn!(key, "No partner table owns this metadata key");
            print_json(&Value::Null)
        },
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
