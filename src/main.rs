//! w3files - upload files to IPFS with a wallet signature and keep a local catalog

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{error, info};

use w3files::{
    catalog::{self, CatalogStore, JsonFileCatalogStore},
    config::{Args, Command, IdentityCommand},
    endpoints::{self, UploadEndpoints},
    logging,
    signer::{AgentRegistry, IdentitySelector, KdfParams, Keyring, StoredIdentity},
    upload::{GatewayClient, UploadFile, UploadSession},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init(&args.log_level, args.log_format);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(2);
    }

    let data_dir = args.data_dir();
    info!(data_dir = %data_dir.display(), "w3files starting");

    let http = build_http_client(&args)?;

    match &args.command {
        Command::Upload { file } => upload(&args, &data_dir, http, file).await,
        Command::List => list(&data_dir),
        Command::Import { file } => import(&data_dir, file),
        Command::Export { path } => export(&data_dir, path.as_deref()),
        Command::Link { hash } => link(&data_dir, hash),
        Command::Download { hash, output } => download(&data_dir, http, hash, output.as_deref()).await,
        Command::Identity(command) => identity(&args, &data_dir, command),
        Command::Gateways => {
            gateways();
            Ok(())
        }
    }
}

fn build_http_client(args: &Args) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = args.request_timeout() {
        builder = builder.timeout(timeout);
    }
    builder.build().context("Failed to build HTTP client")
}

async fn upload(args: &Args, data_dir: &Path, http: reqwest::Client, path: &Path) -> anyhow::Result<()> {
    let keyring = Keyring::load_from_dir(data_dir)?;
    let agents = AgentRegistry::with_client(http.clone());
    let selector = IdentitySelector::from_option(args.identity.clone());
    let mut identity = keyring.resolve(&selector, &agents)?;

    let file = UploadFile::from_path(path)
        .await
        .with_context(|| format!("Cannot read {}", path.display()))?;
    let endpoints = UploadEndpoints::select(args.gateway.as_deref(), args.pinner.as_deref());
    println!(
        "Uploading {} ({} bytes) via {} as {}",
        file.name(),
        file.size(),
        endpoints.gateway,
        identity.address()
    );

    let session = Arc::new(UploadSession::new(GatewayClient::with_client(http)));

    let mut progress = session.subscribe_progress();
    let printer = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let state = *progress.borrow_and_update();
            if state.in_progress {
                eprint!("\r{:>3}%", state.percent_complete);
            }
        }
    });

    // Ctrl-C cancels a running transfer; before the transfer starts it exits.
    let interrupt_session = session.clone();
    let interrupt = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !interrupt_session.cancel() {
                eprintln!();
                std::process::exit(130);
            }
        }
    });

    let result = session
        .start(&mut identity, &file, &endpoints, args.passphrase.as_deref())
        .await;
    interrupt.abort();
    printer.abort();
    eprintln!();

    match result {
        Ok(entry) => {
            let store = JsonFileCatalogStore::in_dir(data_dir);
            let mut catalog = store.load();
            catalog.record_upload(entry.clone());
            store.save(&catalog)?;
            println!("Uploaded {} ({})", entry.name, entry.content_hash);
            println!("{}", entry.download_url());
            Ok(())
        }
        Err(e) if e.is_cancellation() => {
            println!("{}", e.status_message());
            Ok(())
        }
        Err(e) => bail!(e.status_message()),
    }
}

fn list(data_dir: &Path) -> anyhow::Result<()> {
    let catalog = JsonFileCatalogStore::in_dir(data_dir).load();
    if catalog.is_empty() {
        println!("No files");
        return Ok(());
    }
    for entry in &catalog {
        println!("{}\t{}\t{}", entry.content_hash, entry.size_bytes, entry.name);
        println!("\t{}", entry.download_url());
    }
    Ok(())
}

fn import(data_dir: &Path, file: &Path) -> anyhow::Result<()> {
    let store = JsonFileCatalogStore::in_dir(data_dir);
    let existing = store.load();
    let merged = catalog::import_file(file, &existing)?;
    store.save(&merged)?;
    println!("Catalog now holds {} file(s)", merged.len());
    Ok(())
}

fn export(data_dir: &Path, target: Option<&Path>) -> anyhow::Result<()> {
    let catalog = JsonFileCatalogStore::in_dir(data_dir).load();
    let target = target.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let written = catalog::export_file(&catalog, &target)
        .with_context(|| format!("Cannot write {}", target.display()))?;
    println!("Exported {} file(s) to {}", catalog.len(), written.display());
    Ok(())
}

fn link(data_dir: &Path, hash: &str) -> anyhow::Result<()> {
    let catalog = JsonFileCatalogStore::in_dir(data_dir).load();
    let entry = catalog
        .find(hash)
        .with_context(|| format!("{hash} is not in the catalog"))?;
    println!("{}", entry.download_url());
    Ok(())
}

async fn download(data_dir: &Path, http: reqwest::Client, hash: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let catalog = JsonFileCatalogStore::in_dir(data_dir).load();
    let entry = catalog
        .find(hash)
        .with_context(|| format!("{hash} is not in the catalog"))?;
    let dest = output.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));

    let client = GatewayClient::with_client(http);
    let path = client
        .download(entry, &dest, |percent| eprint!("\r{:>3}%", percent))
        .await?;
    eprintln!();
    println!("Saved {}", path.display());
    Ok(())
}

fn identity(args: &Args, data_dir: &Path, command: &IdentityCommand) -> anyhow::Result<()> {
    let mut keyring = Keyring::load_from_dir(data_dir)?;
    match command {
        IdentityCommand::List => {
            if keyring.identities().is_empty() {
                println!("No identities");
            }
            for stored in keyring.identities() {
                let kind = match stored {
                    StoredIdentity::Local { .. } => "local".to_string(),
                    StoredIdentity::Delegated { source, .. } => format!("delegated via {source}"),
                    StoredIdentity::Hardware { .. } => "hardware".to_string(),
                };
                println!("{}\t{}\t{}", stored.address(), stored.name(), kind);
            }
        }
        IdentityCommand::New { name } => {
            let passphrase = args
                .passphrase
                .as_deref()
                .filter(|p| !p.is_empty())
                .context("A passphrase is required (--passphrase or W3FILES_PASSPHRASE)")?;
            let address = keyring
                .generate_local(name, passphrase, KdfParams::default())?
                .address()
                .to_string();
            keyring.save()?;
            println!("Created {address}");
        }
        IdentityCommand::AddDelegated { name, address, source } => {
            keyring.add_delegated(name, address, source)?;
            keyring.save()?;
            println!("Added {address} (signing via {source})");
        }
    }
    Ok(())
}

fn gateways() {
    println!("Gateways:");
    for gateway in endpoints::AUTH_GATEWAYS {
        println!("  {gateway}");
    }
    println!("Pinners:");
    for pinner in endpoints::PINNERS {
        println!("  {pinner}");
    }
}
