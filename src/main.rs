use anyhow::Context;
use clap::{Parser, Subcommand};
use cmsync::config::{self, Config};
use cmsync::resource::schema;
use cmsync::resource::{
    ConfigStore, DesiredConfig, JsonFileStore, PlanAction, ResourceDefinition, ResourceKind, Synchronizer,
};
use cmsync::shared::logging;
use cmsync::CentralManagerClient;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(
    name = "cmsync",
    about = "Synchronize WAF policies, WAF reports and device providers with BIG-IP Next Central Manager.",
    version = APP_VERSION
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        long,
        short = 'c',
        value_name = "PATH",
        help = "Path to the configuration file"
    )]
    pub config: Option<PathBuf>,

    #[arg(long, value_name = "PATH", help = "Override the state file location")]
    pub state: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Validate a resource configuration without contacting Central Manager")]
    Validate { kind: ResourceKind, file: PathBuf },

    #[command(about = "Show the action needed to converge a resource")]
    Plan {
        kind: ResourceKind,
        address: String,
        file: PathBuf,
    },

    #[command(about = "Create, update or replace a resource to match its configuration")]
    Apply {
        kind: ResourceKind,
        address: String,
        file: PathBuf,
    },

    #[command(about = "Refresh the stored state of a resource from Central Manager")]
    Read { kind: ResourceKind, address: String },

    #[command(about = "Adopt an existing remote resource by its id")]
    Import {
        kind: ResourceKind,
        address: String,
        id: String,
    },

    #[command(about = "Delete a resource and forget its identity")]
    Destroy { kind: ResourceKind, address: String },

    #[command(about = "Print the attribute schema of a resource type")]
    Schema { kind: ResourceKind },
}

#[tokio::main]
async fn main() {
    init_logging();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        logging::error(&format!("{:#}", err));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Validate { kind, ref file } => {
            let desired = read_desired(file)?;
            let definition = ResourceDefinition::for_kind(kind);
            let errors = schema::validate(&definition.schema, &desired.attributes);
            if errors.is_empty() {
                println!("{} configuration is valid", kind);
                return Ok(());
            }
            for error in &errors {
                println!("  {}", error);
            }
            anyhow::bail!("{} validation error(s)", errors.len());
        }
        Commands::Schema { kind } => {
            let definition = ResourceDefinition::for_kind(kind);
            println!(
                "{}",
                serde_json::to_string_pretty(&schema::describe(&definition.schema))?
            );
            Ok(())
        }
        _ => run_remote(&cli).await,
    }
}

async fn run_remote(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let connection = config.require_connection()?;
    let client = Arc::new(CentralManagerClient::new(connection)?);
    let store = JsonFileStore::new(cli.state.clone().unwrap_or_else(|| config.state_path()));
    logging::debug(&format!("Using state file {}", store.path().display()));

    match &cli.command {
        Commands::Plan {
            kind,
            address,
            file,
        } => {
            let sync = Synchronizer::for_kind(*kind, client);
            let desired = read_desired(file)?;
            let prior = store.observed(address).await?;
            let action = sync.plan(prior.as_ref(), &desired)?;
            println!("{}: {}", address, describe_action(action));
        }
        Commands::Apply {
            kind,
            address,
            file,
        } => {
            let sync = Synchronizer::for_kind(*kind, client);
            store.stage(address, read_desired(file)?).await;
            let outcome = sync.apply(&store, address).await?;
            logging::info(&format!(
                "{}: {} (id {})",
                address,
                describe_action(outcome.action),
                outcome
                    .state
                    .identity
                    .as_ref()
                    .map(|id| id.to_string())
                    .unwrap_or_default()
            ));
            print_state(&outcome.state.attributes, &sync)?;
        }
        Commands::Read { kind, address } => {
            let sync = Synchronizer::for_kind(*kind, client);
            match sync.refresh(&store, address).await? {
                Some(state) => print_state(&state.attributes, &sync)?,
                None => println!("{} does not exist", address),
            }
        }
        Commands::Import { kind, address, id } => {
            let sync = Synchronizer::for_kind(*kind, client);
            let state = sync.import_into(&store, address, id).await?;
            print_state(&state.attributes, &sync)?;
        }
        Commands::Destroy { kind, address } => {
            let sync = Synchronizer::for_kind(*kind, client);
            if sync.destroy(&store, address).await? {
                println!("{} destroyed", address);
            } else {
                println!("{} is not tracked; nothing to destroy", address);
            }
        }
        Commands::Validate { .. } | Commands::Schema { .. } => {}
    }
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let config = match &cli.config {
        Some(path) => config::init_from_path(path)?,
        None => {
            logging::info("No config path provided, using environment configuration");
            config::init_default()?
        }
    };
    Ok(config)
}

fn read_desired(path: &Path) -> anyhow::Result<DesiredConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    DesiredConfig::from_value(value)
        .with_context(|| format!("{} must contain a JSON object", path.display()))
}

fn describe_action(action: PlanAction) -> &'static str {
    match action {
        PlanAction::Create => "create",
        PlanAction::Update => "update in place",
        PlanAction::Replace => "destroy and recreate",
        PlanAction::NoChange => "no changes",
    }
}

/// Print attributes with sensitive values masked
fn print_state(
    attributes: &serde_json::Map<String, serde_json::Value>,
    sync: &Synchronizer,
) -> anyhow::Result<()> {
    let mut shown = attributes.clone();
    for attr in sync.definition().schema.iter().filter(|a| a.sensitive) {
        if let Some(serde_json::Value::String(secret)) = shown.get_mut(attr.name) {
            *secret = logging::redact(secret);
        }
    }
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}

fn init_logging() {
    let log_level = std::env::var("CMSYNC_LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase();

    let filter = match log_level.as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("cmsync={},reqwest=warn,hyper=warn", filter).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
