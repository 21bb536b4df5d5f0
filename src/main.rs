use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::{error, info};

use hearthsync::{
    auth::{Identity, SessionProvider},
    params, query, registry,
    repo::facades::{FacadeError, FacadeRegistry, ListOptions},
    store::PgStore,
    types::{ChangeEvent, ChangeKind, Record},
};

#[derive(Parser, Debug)]
#[command(version, about = "Inspect and watch household entity collections")]
struct Cli {
    /// Database connection string, overrides `HEARTH_DATABASE_URL`
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the entity table
    Entities,

    /// List records of an entity
    List {
        /// Logical entity name (e.g. `Task`)
        entity: String,
        /// Sort spec, `field` or `-field`
        #[arg(long)]
        sort: Option<String>,
        /// Maximum number of records, 0 for no limit
        #[arg(long)]
        limit: Option<u32>,
        /// Equality filter `field=value`, can be repeated
        #[arg(long = "where", value_name = "FIELD=VALUE")]
        filters: Vec<String>,
    },

    /// Fetch a single record
    Get { entity: String, id: String },

    /// Create a record from a JSON object
    Create {
        entity: String,
        json: String,
        /// Email stamped as record owner
        #[arg(long = "as")]
        as_email: Option<String>,
    },

    /// Print row changes of an entity until interrupted
    Watch { entity: String },

    /// Install change feed triggers, on every entity when none is given
    InstallTriggers { entities: Vec<String> },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing database url, set {} or pass --database-url", params::env::DATABASE_URL)]
    MissingDatabaseUrl,
    #[error("bad filter `{0}`, expected FIELD=VALUE")]
    BadFilter(String),
    #[error("bad record :: {0}")]
    BadRecord(String),
    #[error(transparent)]
    Facade(#[from] FacadeError),
}

impl From<query::Error> for CliError {
    fn from(e: query::Error) -> Self {
        Self::Facade(e.into())
    }
}

impl From<registry::Error> for CliError {
    fn from(e: registry::Error) -> Self {
        Self::Facade(e.into())
    }
}

impl From<hearthsync::store::Error> for CliError {
    fn from(e: hearthsync::store::Error) -> Self {
        Self::Facade(e.into())
    }
}

/// Parses `field=value`, the value is read as JSON when possible and as
/// text otherwise.
fn parse_filters(raw: &[String]) -> Result<query::FilterSpec, CliError> {
    let mut map = serde_json::Map::new();
    for f in raw {
        let (field, value) = f
            .split_once('=')
            .ok_or_else(|| CliError::BadFilter(f.clone()))?;
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_owned()));
        map.insert(field.to_owned(), value);
    }
    Ok(query::FilterSpec::from_json(map)?)
}

fn print_record(record: &Record) {
    match serde_json::to_string(record) {
        Ok(line) => println!("{line}"),
        Err(e) => error!("unable to print record :: {e}"),
    }
}

fn print_event(event: &ChangeEvent) {
    let kind = match event.kind {
        ChangeKind::Create => event.kind.to_string().green(),
        ChangeKind::Update => event.kind.to_string().yellow(),
        ChangeKind::Delete => event.kind.to_string().red(),
    };
    let record = event
        .record
        .as_ref()
        .and_then(|r| serde_json::to_string(r).ok())
        .unwrap_or_else(|| "null".to_owned());
    println!("{} {} {}", kind.bold(), event.id.cyan(), record.dimmed());
}

async fn run(cli: Cli) -> Result<(), CliError> {
    if let Commands::Entities = cli.command {
        for d in registry::descriptors() {
            println!("{:<20} {}", d.logical_name.bold(), d.physical_collection);
        }
        return Ok(());
    }

    let url = cli
        .database_url
        .or_else(|| params::configurables().database_url.clone())
        .ok_or(CliError::MissingDatabaseUrl)?;
    let store = PgStore::connect(&url).await?;
    let session = Arc::new(SessionProvider::new());
    let facades = FacadeRegistry::new(Arc::new(store.clone()), session.clone());

    match cli.command {
        Commands::Entities => {}

        Commands::List {
            entity,
            sort,
            limit,
            filters,
        } => {
            let facade = facades.by_name(&entity)?;
            let records = facade
                .filter(parse_filters(&filters)?, ListOptions { sort, limit })
                .await?;
            records.iter().for_each(print_record);
            info!("{} record(s)", records.len());
        }

        Commands::Get { entity, id } => {
            let record = facades.by_name(&entity)?.get(&id).await?;
            print_record(&record);
        }

        Commands::Create {
            entity,
            json,
            as_email,
        } => {
            let facade = facades.by_name(&entity)?;
            let data = serde_json::from_str::<serde_json::Value>(&json)
                .map_err(|e| CliError::BadRecord(e.to_string()))?;
            let data = Record::try_from(data)
                .map_err(|v| CliError::BadRecord(format!("expected an object, got `{v}`")))?;

            if let Some(email) = as_email {
                session.sign_in(Identity::new(email.clone(), email)).await;
            }

            print_record(&facade.create(data).await?);
        }

        Commands::Watch { entity } => {
            let facade = facades.by_name(&entity)?;
            let subscription = facade.subscribe(|event| print_event(&event)).await?;
            info!(
                "watching `{}`, press ctrl-c to stop",
                subscription.collection()
            );

            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("unable to listen for ctrl-c :: {e}");
            }
            subscription.unsubscribe();
        }

        Commands::InstallTriggers { entities } => {
            let collections: Vec<&'static str> = if entities.is_empty() {
                registry::descriptors()
                    .map(|d| d.physical_collection)
                    .collect()
            } else {
                entities
                    .iter()
                    .map(|e| registry::physical_collection_for(e))
                    .collect::<Result<_, _>>()?
            };

            for collection in collections {
                store.install_change_feed(collection).await?;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::new().filter_or(params::env::LOG, "info"))
        .init();

    if let Err(e) = run(Cli::parse()).await {
        error!("{e}");
        std::process::exit(1);
    }
}
