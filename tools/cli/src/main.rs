//! plexaccess CLI - inspect and edit persisted access state.
//!
//! Provisions the app secret on first run and gives an administrator direct
//! access to the stored token, server binding, pending pin, and users.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use plexaccess_crypto::generate_secret;
use plexaccess_store::{Server, Store, StoreOptions};

#[derive(Parser)]
#[command(name = "plexaccess")]
#[command(about = "plexaccess - Plex media access state")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Store directory (default: <data dir>/plexaccess).
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate and save the app secret if none exists.
    Init,

    /// Manage the Plex token.
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Manage the bound Plex server.
    Server {
        #[command(subcommand)]
        action: ServerAction,
    },

    /// Manage the pending authorization pin.
    Pin {
        #[command(subcommand)]
        action: PinAction,
    },

    /// Manage users with assigned media.
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Encrypt and store a token.
    Set {
        token: String,
    },
    /// Check that the stored token decrypts.
    Check,
}

#[derive(Subcommand)]
enum ServerAction {
    /// Bind a server, replacing any previous one.
    Set {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        url: String,
    },
    /// Show the bound server.
    Show,
}

#[derive(Subcommand)]
enum PinAction {
    /// Show the pending pin.
    Show,
    /// Abandon the pending authorization flow.
    Clear,
}

#[derive(Subcommand)]
enum UsersAction {
    /// List all users.
    List,
    /// Show one user.
    Show {
        id: String,
    },
    /// Remove users by id.
    Remove {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    let store = Store::open(&data_dir, StoreOptions::new().verbose(cli.verbose))
        .with_context(|| format!("Failed to open store at {}", data_dir.display()))?;

    let result = run(&store, cli.command);
    store.close();
    result
}

fn default_data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("No data directory for this platform; pass --data-dir")?;
    Ok(base.join("plexaccess"))
}

fn run(store: &Store, command: Commands) -> Result<()> {
    match command {
        Commands::Init => cmd_init(store).map(|created| {
            if created {
                println!("App secret generated.");
            } else {
                println!("App secret already present.");
            }
        }),

        Commands::Token { action } => match action {
            TokenAction::Set { token } => cmd_token_set(store, &token),
            TokenAction::Check => cmd_token_check(store),
        },

        Commands::Server { action } => match action {
            ServerAction::Set { name, url } => cmd_server_set(store, &name, &url),
            ServerAction::Show => cmd_server_show(store),
        },

        Commands::Pin { action } => match action {
            PinAction::Show => cmd_pin_show(store),
            PinAction::Clear => cmd_pin_clear(store),
        },

        Commands::Users { action } => match action {
            UsersAction::List => cmd_users_list(store),
            UsersAction::Show { id } => cmd_users_show(store, &id),
            UsersAction::Remove { ids } => cmd_users_remove(store, &ids),
        },
    }
}

/// Save a fresh app secret unless one exists. Returns whether one was created.
fn cmd_init(store: &Store) -> Result<bool> {
    let existing = store.get_secret().context("Failed to read app secret")?;
    if !existing.is_empty() {
        return Ok(false);
    }

    let secret = generate_secret();
    store
        .save_secret(secret.as_bytes())
        .context("Failed to save app secret")?;
    info!("App secret provisioned");
    Ok(true)
}

fn cmd_token_set(store: &Store, token: &str) -> Result<()> {
    if token.is_empty() {
        anyhow::bail!("Token cannot be empty");
    }

    store
        .save_plex_token(token)
        .context("Failed to save token (run `plexaccess init` first?)")?;
    println!("Token saved.");
    Ok(())
}

fn cmd_token_check(store: &Store) -> Result<()> {
    let token = store.get_plex_token().context("Failed to read token")?;
    println!("Token decrypts ({} characters).", token.len());
    Ok(())
}

fn cmd_server_set(store: &Store, name: &str, url: &str) -> Result<()> {
    store
        .save_plex_server(&Server::new(name, url))
        .context("Failed to save server")?;
    println!("Server saved.");
    Ok(())
}

fn cmd_server_show(store: &Store) -> Result<()> {
    let server = store.get_plex_server().context("No server bound")?;
    println!("Name: {}", server.name);
    println!("URL:  {}", server.url);
    Ok(())
}

fn cmd_pin_show(store: &Store) -> Result<()> {
    let pin = store
        .get_plex_pin()
        .context("No authorization in progress")?;
    println!("Pin {} (code {})", pin.id, pin.code);
    println!("  Expires at: {}", pin.expires_at);
    println!("  Authorized: {}", pin.auth_token.is_some());
    Ok(())
}

fn cmd_pin_clear(store: &Store) -> Result<()> {
    store.clear_plex_pin().context("Failed to clear pin")?;
    println!("Pin cleared.");
    Ok(())
}

fn cmd_users_list(store: &Store) -> Result<()> {
    let users = store.get_all_users().context("Failed to list users")?;

    if users.is_empty() {
        println!("(no users)");
        return Ok(());
    }

    for (id, user) in &users {
        println!(
            "{:<12} {:<20} {} [{}]",
            id, user.name, user.assigned_media.title, user.assigned_media.status
        );
    }
    Ok(())
}

fn cmd_users_show(store: &Store, id: &str) -> Result<()> {
    let user = store
        .get_user(id)
        .with_context(|| format!("Failed to read user {}", id))?;

    println!("User {} ({})", user.plex_user_id, user.name);
    println!(
        "  Media:    {} ({}) - {}",
        user.assigned_media.title, user.assigned_media.id, user.assigned_media.status
    );
    println!("  Friend:   {}", user.is_friend);
    println!(
        "  Playback: stopping={} stopped={}",
        user.stopping_playback, user.is_playback_stopped
    );
    println!("  Revoke:   {}", user.revoke_access);
    Ok(())
}

fn cmd_users_remove(store: &Store, ids: &[String]) -> Result<()> {
    store.delete_users(ids).context("Failed to remove users")?;
    println!("Removed {} user(s).", ids.len());
    Ok(())
}
