use anyhow::Result;
use authstate::auth::{deserialize_macaroon, Macaroon};
use authstate::{AuthConfig, AuthStore};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "authstate")]
#[command(about = "Manage macaroon authentication records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a new authenticated user
    Create {
        /// Username; replaces any existing record for it
        #[arg(short, long)]
        username: Option<String>,

        /// Serialized macaroon
        #[arg(short, long)]
        macaroon: String,

        /// Serialized discharge macaroon (repeatable)
        #[arg(short, long = "discharge")]
        discharges: Vec<String>,
    },

    /// Remove the record for a username
    Remove {
        username: String,
    },

    /// Show a user by id
    Get {
        id: u64,
    },

    /// List all users
    List,

    /// Find the user holding a macaroon and discharge set
    Check {
        #[arg(short, long)]
        macaroon: String,

        #[arg(short, long = "discharge")]
        discharges: Vec<String>,
    },

    /// Print the Authorization header value for a user
    Header {
        id: u64,
    },

    /// Decode a serialized macaroon and show its contents
    Inspect {
        serialized: String,
    },

    /// Print the JSON Schema of the config file
    Schema,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Schema => {
            println!("{}", serde_json::to_string_pretty(&AuthConfig::json_schema())?);
            Ok(())
        }
        Commands::Inspect { serialized } => inspect(&serialized),
        command => {
            let config = AuthConfig::load_or_default(cli.config.as_deref())?;
            config.ensure_persistent()?;
            let store = AuthStore::from_config(&config)?;
            let _guard = store.lock();
            run(&store, command)
        }
    }
}

fn run(store: &AuthStore, command: Commands) -> Result<()> {
    match command {
        Commands::Create {
            username,
            macaroon,
            discharges,
        } => {
            let user = store.create_user(username.as_deref(), &macaroon, discharges)?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Commands::Remove { username } => {
            if !store.remove_user(&username)? {
                tracing::info!(username = %username, "No auth user with that username");
            }
        }
        Commands::Get { id } => {
            println!("{}", serde_json::to_string_pretty(&store.user(id)?)?);
        }
        Commands::List => {
            println!("{}", serde_json::to_string_pretty(&store.users()?)?);
        }
        Commands::Check {
            macaroon,
            discharges,
        } => {
            let user = store.check_macaroon(&macaroon, &discharges)?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Commands::Header { id } => {
            println!("{}", store.user(id)?.authenticator().authorization_header());
        }
        // State-free commands are dispatched in main
        Commands::Inspect { .. } | Commands::Schema => {}
    }

    Ok(())
}

fn inspect(serialized: &str) -> Result<()> {
    let m: Macaroon = deserialize_macaroon(serialized)?;

    let caveats: Vec<_> = m
        .caveats()
        .iter()
        .map(|c| {
            serde_json::json!({
                "id": String::from_utf8_lossy(&c.id),
                "location": c.location,
                "third-party": c.is_third_party(),
            })
        })
        .collect();

    let summary = serde_json::json!({
        "id": String::from_utf8_lossy(m.id()),
        "location": m.location(),
        "caveats": caveats,
        "signature": m.signature_hex(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
