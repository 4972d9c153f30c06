use anyhow::{bail, Context};
use keystead_channel::{AttestedTlsContext, ChannelOptions};
use keystead_core::{logging, AttestationMode, CoreError, ServiceConfig, SystemClock};
use keystead_identity::{CertAndKey, FakeQuotePolicy, FakeQuoteProvider, InsecurePolicy, PolicyRef};
use keystead_keymanager::{
    AdminOps, ConfigSourceRef, ContractSnapshot, KeyLifecycleManager, KeyManagerError,
    KeyManagerService, StaticConfigSource,
};
use keystead_store::{SignedRecordStore, StoreError};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

const NODE_PROTOCOL_VERSION: u32 = 1;
const NODE_RUNTIME_VERSION: u32 = 1;

/// Exit code for integrity violations in the persisted state.
const EXIT_INTEGRITY: i32 = 3;

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    runtime_version: u32,
    protocol_version: u32,
}

/// One-shot operator commands run against a stopped node's store.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Serve,
    Status,
    Generate(String),
    Remove(String),
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--version-json") {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            runtime_version: NODE_RUNTIME_VERSION,
            protocol_version: NODE_PROTOCOL_VERSION,
        };
        match serde_json::to_string(&handshake) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("[keystead-node] {e}"),
        }
        return;
    }

    if let Err(e) = run(&args).await {
        error!(error = %e, "keystead-node stopped");
        eprintln!("[keystead-node] {e:#}");
        std::process::exit(if is_fatal(&e) { EXIT_INTEGRITY } else { 1 });
    }
}

async fn run(args: &[String]) -> anyhow::Result<()> {
    let config_path = parse_config_path(args)?;
    let command = parse_command(args)?;
    let config = ServiceConfig::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    logging::init_with(config.logging.format, &config.logging.level);
    if config.service.is_test {
        warn!("Running in test mode");
    }

    let source: ConfigSourceRef = Arc::new(StaticConfigSource::new(
        ContractSnapshot::from_section(&config.contract)?,
    ));
    let store = SignedRecordStore::open(&config.service.db_path, &config.machine_private_key()?)?;
    let manager = KeyLifecycleManager::open(store, source.clone(), Arc::new(SystemClock))?;
    let check_hashes = config.check_hashes();

    match command {
        Command::Serve => serve(&config, manager, source, check_hashes).await,
        Command::Status => {
            let admin = AdminOps::new(manager.into_shared(), source, check_hashes);
            print!("{}", admin.status().await);
            Ok(())
        }
        Command::Generate(role) => {
            let admin = AdminOps::new(manager.into_shared(), source, check_hashes);
            println!("{}", admin.generate_key(&role).await?);
            Ok(())
        }
        Command::Remove(public_key) => {
            let admin = AdminOps::new(manager.into_shared(), source, check_hashes);
            println!("{}", admin.remove_key(&public_key).await?);
            Ok(())
        }
    }
}

async fn serve(
    config: &ServiceConfig,
    manager: KeyLifecycleManager,
    source: ConfigSourceRef,
    check_hashes: bool,
) -> anyhow::Result<()> {
    let image_hash = config.image_hash()?;
    let cert = CertAndKey::generate(&FakeQuoteProvider::new(image_hash))?;
    let policy: PolicyRef = match config.attestation.mode {
        AttestationMode::Fake => Arc::new(FakeQuotePolicy::new()),
        AttestationMode::Insecure => Arc::new(InsecurePolicy),
    };
    let tls = AttestedTlsContext::new(cert, policy).with_options(ChannelOptions {
        handshake_timeout: Duration::from_secs(config.service.handshake_timeout_secs),
        ..ChannelOptions::default()
    });

    let listener = TcpListener::bind(config.service.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.service.listen_addr))?;

    info!(
        listen_addr = %config.service.listen_addr,
        db_path = %config.service.db_path.display(),
        check_hashes,
        image_hash = %hex_prefix(&image_hash),
        "keystead-node starting"
    );

    let service = Arc::new(
        KeyManagerService::new(manager, source, tls, check_hashes)
            .with_reconcile_interval(Duration::from_secs(config.service.reconcile_interval_secs)),
    );

    tokio::select! {
        result = service.run(listener) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
    }
    Ok(())
}

fn is_fatal(e: &anyhow::Error) -> bool {
    if let Some(e) = e.downcast_ref::<KeyManagerError>() {
        return e.is_fatal();
    }
    if let Some(e) = e.downcast_ref::<StoreError>() {
        return e.is_fatal();
    }
    e.downcast_ref::<CoreError>().is_some_and(|e| e.is_fatal())
}

fn hex_prefix(bytes: &[u8; 32]) -> String {
    bytes[..8].iter().map(|b| format!("{b:02x}")).collect()
}

fn parse_config_path(args: &[String]) -> anyhow::Result<PathBuf> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            if let Some(path) = args_iter.next() {
                return Ok(PathBuf::from(path));
            }
            bail!("--config was provided without a path");
        }
    }

    bail!("missing required --config <path> argument")
}

fn parse_command(args: &[String]) -> anyhow::Result<Command> {
    let mut positional = Vec::new();
    let mut args_iter = args.iter().skip(1);
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            args_iter.next();
        } else {
            positional.push(arg.as_str());
        }
    }

    match positional.as_slice() {
        [] | ["serve"] => Ok(Command::Serve),
        ["status"] => Ok(Command::Status),
        ["generate", role] => Ok(Command::Generate(role.to_string())),
        ["remove", public_key] => Ok(Command::Remove(public_key.to_string())),
        other => bail!("unknown command: {}", other.join(" ")),
    }
}
