use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use specgraph::config::Config;
use specgraph::db::Database;
use specgraph::graph::{self, DependencyGraph};
use specgraph::ids;
use specgraph::models::{Entity, EntityType, SubItemKind};
use specgraph::store::{EntityStore, ListOptions, SortDirection};
use specgraph::supersession;
use specgraph::validation::ValidationEngine;

#[derive(Parser)]
#[command(name = "specgraph")]
#[command(about = "Typed specification documents with referential integrity")]
struct Cli {
    /// Database file (overrides config and SPECGRAPH_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create one entity, or several when the file holds a JSON array
    Create {
        entity_type: EntityType,
        /// JSON file, or `-` for stdin
        file: PathBuf,
    },
    /// Print one entity
    Get { id: String },
    /// List entities of one type
    List {
        entity_type: EntityType,
        /// Field to sort by
        #[arg(long)]
        sort: Option<String>,
        /// Sort descending
        #[arg(long)]
        desc: bool,
        #[arg(long)]
        offset: Option<usize>,
        #[arg(long)]
        limit: Option<usize>,
        /// `field=value`; repeat a field to accept any of several values
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, Value)>,
    },
    /// Merge a JSON patch into an entity
    Update {
        id: String,
        /// JSON file, or `-` for stdin
        file: PathBuf,
    },
    /// Delete an entity
    Delete { id: String },
    /// Replace a sub-item with a new version, keeping the old one
    Supersede {
        entity_id: String,
        kind: SubItemKind,
        old_id: String,
        /// JSON file with the replacement fields, or `-` for stdin
        file: PathBuf,
    },
    /// Print every version of a sub-item, oldest first
    History { entity_id: String, item_id: String },
    /// Validate every entity, or only the one given
    Validate {
        #[arg(long)]
        entity: Option<String>,
    },
    /// Report dependency cycles among components and plans
    Cycles,
}

/// Initialize tracing with output to stderr so stdout carries only results.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "specgraph=info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = Config::load();
    let db = match cli.db.or(config.database_path) {
        Some(path) => Database::open(path)?,
        None => Database::open_default()?,
    };
    db.migrate()?;
    let store = Arc::new(EntityStore::new(Arc::new(db)));

    match cli.command {
        Commands::Create { entity_type, file } => match read_json(&file)? {
            Value::Array(drafts) => print(&store.batch_create(entity_type, drafts)?)?,
            draft => print(&store.create(entity_type, draft)?)?,
        },
        Commands::Get { id } => match store.get_by_id(&id)? {
            Some(entity) => print(&entity)?,
            None => bail!("{id} not found"),
        },
        Commands::List {
            entity_type,
            sort,
            desc,
            offset,
            limit,
            filters,
        } => {
            let mut options = ListOptions::default();
            for (field, value) in filters {
                options = options.filter(field, value);
            }
            if let Some(field) = sort {
                let direction = if desc {
                    SortDirection::Desc
                } else {
                    SortDirection::Asc
                };
                options = options.sort_by(field, direction);
            }
            options.offset = offset;
            options.limit = limit;
            print(&store.list(entity_type, &options)?)?;
        }
        Commands::Update { id, file } => {
            let entity_type = entity_type_of(&id)?;
            match store.update(entity_type, &id, read_json(&file)?)? {
                Some(entity) => print(&entity)?,
                None => bail!("{id} not found"),
            }
        }
        Commands::Delete { id } => {
            if !store.delete(entity_type_of(&id)?, &id)? {
                bail!("{id} not found");
            }
        }
        Commands::Supersede {
            entity_id,
            kind,
            old_id,
            file,
        } => {
            let entity_type = entity_type_of(&entity_id)?;
            let new_data = read_json(&file)?;
            match store.supersede_sub_item(entity_type, &entity_id, kind, &old_id, new_data)? {
                Some(item) => print(&item)?,
                None => bail!("{entity_id} not found"),
            }
        }
        Commands::History { entity_id, item_id } => {
            let Some(entity) = store.get_by_id(&entity_id)? else {
                bail!("{entity_id} not found");
            };
            print(&history(&entity, &item_id)?)?;
        }
        Commands::Validate { entity } => {
            let engine = Arc::new(
                ValidationEngine::with_default_validators(Arc::clone(&store))
                    .with_min_component_description_len(config.min_component_description_len),
            );
            let result = match entity {
                Some(id) => match store.get_by_id(&id)? {
                    Some(entity) => engine.validate_entity(&entity),
                    None => bail!("{id} not found"),
                },
                None => engine.run_full_validation().await,
            };
            print(&result)?;
            if !result.valid {
                std::process::exit(1);
            }
        }
        Commands::Cycles => {
            let entities = store.list_all(&EntityType::ALL)?;
            let components = DependencyGraph::from_nodes(
                entities.iter().filter(|e| e.entity_type().is_component()),
            );
            let plans = DependencyGraph::from_nodes(
                entities.iter().filter(|e| e.entity_type() == EntityType::Plan),
            );
            let cycles: Vec<String> = components
                .detect_cycles()
                .into_iter()
                .chain(plans.detect_cycles())
                .map(|cycle| graph::format_cycle(&cycle))
                .collect();
            print(&cycles)?;
            if !cycles.is_empty() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn print<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let content = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("Failed to read stdin")?
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    };
    serde_json::from_str(&content).context("Failed to parse JSON input")
}

fn entity_type_of(id: &str) -> anyhow::Result<EntityType> {
    ids::parse(id)
        .map(|p| p.entity_type)
        .ok_or_else(|| anyhow::anyhow!("unrecognised entity id: {id}"))
}

fn parse_filter(arg: &str) -> Result<(String, Value), String> {
    let (field, raw) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected field=value, got '{arg}'"))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::from(raw));
    Ok((field.to_string(), value))
}

fn history(entity: &Entity, item_id: &str) -> anyhow::Result<Vec<Value>> {
    let kind = ids::parse_child(item_id)
        .map(|c| c.kind)
        .ok_or_else(|| anyhow::anyhow!("unrecognised sub-item id: {item_id}"))?;

    let versions = supersession::history_in(entity, kind, item_id)?
        .ok_or_else(|| anyhow::anyhow!("{} has no {kind} collection", entity.entity_type()))?;

    if versions.is_empty() {
        bail!("{item_id} not found in {}", entity.id());
    }
    Ok(versions)
}
