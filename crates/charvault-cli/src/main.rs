//! Charvault CLI
//!
//! Thin wrapper around charvault-core for inspecting, repairing and syncing
//! a character library from the command line.
//!
//! ## Usage
//!
//! ```bash
//! # List characters
//! charvault list
//!
//! # Save a character (new id unless --id is given)
//! charvault save --name "Thal" --field class=ranger --field level=7
//!
//! # Show one character as JSON
//! charvault show <id>
//!
//! # Delete a character
//! charvault delete <id>
//!
//! # Push pending changes to a remote store
//! charvault --remote-url https://api.example.com/v1 --token $TOKEN sync
//!
//! # Diagnose and repair duplicates
//! charvault health
//! charvault fix-duplicates
//!
//! # Recover from an unreadable local database
//! charvault reset --force
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use charvault_core::logging::{init_logging, LogConfig};
use charvault_core::{
    AuthHandle, CharacterMeta, CharacterPayload, HttpRemote, HybridStore, ImageData, StoreConfig,
    StoreError,
};
use clap::{Parser, Subcommand};

/// Charvault - local-first character library
#[derive(Parser)]
#[command(name = "charvault")]
#[command(version)]
#[command(about = "Charvault - local-first character library with cloud sync")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Data directory (default: ~/.charvault/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON config file (default: <data-dir>/charvault.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Remote store base URL; without it the library runs local-only
    #[arg(long, global = true)]
    remote_url: Option<String>,

    /// Bearer token for the remote store
    #[arg(long, global = true)]
    token: Option<String>,

    /// Also write JSONL logs to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all characters
    List,

    /// Show a character as JSON
    Show {
        /// Character ID
        id: String,
        /// Also resolve the image (prints its size)
        #[arg(long)]
        with_image: bool,
    },

    /// Create or update a character
    Save {
        /// Character name
        #[arg(short, long)]
        name: String,
        /// Existing character ID to overwrite
        #[arg(long)]
        id: Option<String>,
        /// Extra field as key=value (value parsed as JSON when possible)
        #[arg(short, long = "field", value_parser = parse_field)]
        fields: Vec<(String, serde_json::Value)>,
        /// Image file to attach
        #[arg(long)]
        image: Option<PathBuf>,
        /// Mark as a read-only example character
        #[arg(long)]
        example: bool,
    },

    /// Delete a character
    Delete {
        /// Character ID
        id: String,
    },

    /// Push pending changes to the remote store
    Sync,

    /// Check the library for duplicates and missing fields
    Health,

    /// Collapse duplicate characters (manual repair)
    FixDuplicates,

    /// Show sync status and pending operations
    Status,

    /// Delete the local database (pending changes are lost)
    Reset {
        /// Confirm the reset (required)
        #[arg(long)]
        force: bool,
    },
}

/// Parse a `key=value` field; the value is JSON if it parses, else a string.
fn parse_field(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty field name in '{}'", s));
    }
    if key == "name" || key == "image" {
        return Err(format!("'{}' is set with its own flag", key));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Get the default data directory (~/.charvault/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".charvault")
        .join("data")
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

fn load_config(cli: &Cli) -> Result<StoreConfig> {
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| data_dir.join("charvault.json"));
    let mut config = StoreConfig::load(&config_path)
        .with_context(|| format!("Failed to read config {}", config_path.display()))?;
    config.data_dir = data_dir;
    Ok(config)
}

fn storage_hint(err: StoreError) -> anyhow::Error {
    if matches!(err, StoreError::StorageOpen(_)) {
        eprintln!("The local character database could not be opened.");
        eprintln!("To start over with an empty library, run: charvault reset --force");
    }
    err.into()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&LogConfig {
        verbosity: cli.verbose,
        logs_dir: cli.log_dir.clone(),
        instance: "cli".to_string(),
    })?;

    let config = load_config(&cli)?;
    tracing::debug!(
        data_dir = %config.data_dir.display(),
        remote = cli.remote_url.is_some(),
        "Opening character library"
    );

    let remote = match &cli.remote_url {
        Some(url) => Some(HttpRemote::new(
            url.as_str(),
            cli.token.clone(),
            config.remote_timeout(),
        )?),
        None => None,
    };
    let auth = AuthHandle::new(remote.is_some());
    let store = HybridStore::open(config, Arc::new(remote), auth);

    if !matches!(cli.command, Commands::Reset { .. }) {
        store.initialize().await.map_err(storage_hint)?;
    }

    match cli.command {
        Commands::List => {
            let characters = store.get_characters();
            if characters.is_empty() {
                println!("No characters yet.");
                println!();
                println!("Save one with: charvault save --name \"<name>\"");
            } else {
                println!("Characters ({}):", characters.len());
                for c in characters {
                    let example = if c.is_example { " (example)" } else { "" };
                    println!("  {}  {}  [{}]{}", c.id, c.name(), c.source, example);
                }
            }
        }

        Commands::Show { id, with_image } => {
            if with_image {
                let loaded = store
                    .load_character_with_image(&id)
                    .await?
                    .with_context(|| format!("Character not found: {}", id))?;
                println!("{}", serde_json::to_string_pretty(&loaded.character)?);
                match loaded.image {
                    Some(bytes) => println!("Image: {} bytes", bytes.len()),
                    None => println!("Image: (none)"),
                }
            } else {
                let character = store
                    .get_character(&id)
                    .with_context(|| format!("Character not found: {}", id))?;
                println!("{}", serde_json::to_string_pretty(&character)?);
            }
        }

        Commands::Save {
            name,
            id,
            fields,
            image,
            example,
        } => {
            let mut payload = CharacterPayload::new(name);
            for (key, value) in fields {
                payload = payload.with_field(key, value);
            }

            let image = match image {
                Some(path) => {
                    let bytes = std::fs::read(&path)
                        .with_context(|| format!("Failed to read image {}", path.display()))?;
                    Some(ImageData {
                        bytes,
                        content_type: content_type_for(&path).to_string(),
                    })
                }
                None => None,
            };

            let saved = store
                .save_character(
                    payload,
                    CharacterMeta {
                        id,
                        is_example: example,
                        image,
                    },
                )
                .await?;

            println!("Saved character:");
            println!("  ID: {}", saved.id);
            println!("  Name: {}", saved.name());
            println!("  Source: {}", saved.source);
        }

        Commands::Delete { id } => {
            if store.delete_character(&id).await? {
                println!("Deleted character {}", id);
            } else {
                println!("Character {} was not stored locally; remote delete queued", id);
            }
        }

        Commands::Sync => {
            let report = store.sync_to_cloud().await?;
            println!("Sync complete: {}", report);
            if cli.remote_url.is_none() && report.skipped > 0 {
                println!("(no --remote-url given, changes stay local)");
            }
        }

        Commands::Health => {
            let report = store.check_library_health_status();
            if report.is_healthy {
                println!("Library is healthy ({} characters checked)", report.checked);
            } else {
                println!("Found {} issue(s):", report.issues.len());
                for issue in &report.issues {
                    println!("  - {}", issue);
                }
                if report.has_conflicts() {
                    println!();
                    println!("To collapse duplicates, run: charvault fix-duplicates");
                } else if report.has_duplicates() {
                    println!();
                    println!("Characters sharing a name are kept; rename one if that is unintended.");
                }
            }
        }

        Commands::FixDuplicates => {
            let removed = store.emergency_fix_duplicates().await?;
            println!("Removed {} duplicate(s)", removed);
        }

        Commands::Status => {
            println!("State: {}", store.state());
            println!("Sync: {}", store.status());
            let pending = store.pending()?;
            if pending.is_empty() {
                println!("Pending operations: none");
            } else {
                println!("Pending operations ({}):", pending.len());
                for entry in pending {
                    println!("  {:?}  {}", entry.op, entry.id);
                }
            }
        }

        Commands::Reset { force } => {
            if !force {
                println!("WARNING: Resetting deletes the local character database!");
                println!();
                println!("This will:");
                println!("  - Remove every locally stored character and image");
                println!("  - Drop changes that were never synced");
                println!();
                println!("To confirm, run: charvault reset --force");
            } else {
                store.reset_local()?;
                println!("Local library reset: {}", store.local().path().display());
            }
        }
    }

    Ok(())
}
