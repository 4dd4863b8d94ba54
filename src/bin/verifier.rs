//! Verifier - operational CLI for the contract verification pipeline.
//!
//! ## Usage
//!
//! ```sh
//! verifier verify <network> <code-hash> --package <archive>
//! verifier status <network> <code-hash>
//! verifier submit-metadata <network> <code-hash> --file <metadata.json> --signature <hex>
//! verifier sweep
//! ```
//!
//! `verify` runs the full pipeline on a local archive: admission, staging,
//! archive sniffing, pristine bytecode download, sandboxed build, and then
//! polls the job status until the build resolves. `sweep` removes stale
//! staging/processing trees from a previous unclean shutdown and must run
//! before (re)starting service use.
//!
//! Configuration is environment-driven; see the crate's `config` module.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use contract_verifier::{
    job, metadata, BuildExecutor, ProcessRegistry, RpcBytecodeSource, VerificationJob,
    VerifierConfig, VerifierLocations,
};

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Debug)]
enum Command {
    Verify {
        network: String,
        code_hash: String,
        package: PathBuf,
    },
    Status {
        network: String,
        code_hash: String,
    },
    SubmitMetadata {
        network: String,
        code_hash: String,
        file: PathBuf,
        signature: String,
    },
    Sweep,
    Version,
    Help,
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Help);
    }

    match args[1].as_str() {
        "verify" => {
            if args.len() < 4 {
                return Err("verify requires <network> <code-hash>".to_string());
            }
            let network = args[2].clone();
            let code_hash = args[3].clone();
            let mut package = None;
            let mut i = 4;
            while i < args.len() {
                match args[i].as_str() {
                    "--package" | "-p" => {
                        if i + 1 < args.len() {
                            package = Some(PathBuf::from(&args[i + 1]));
                            i += 2;
                        } else {
                            return Err("--package requires a path".to_string());
                        }
                    }
                    other => return Err(format!("unknown argument: {}", other)),
                }
            }
            let package = package.ok_or("verify requires --package <archive>")?;
            Ok(Command::Verify {
                network,
                code_hash,
                package,
            })
        }
        "status" => {
            if args.len() < 4 {
                return Err("status requires <network> <code-hash>".to_string());
            }
            Ok(Command::Status {
                network: args[2].clone(),
                code_hash: args[3].clone(),
            })
        }
        "submit-metadata" => {
            if args.len() < 4 {
                return Err("submit-metadata requires <network> <code-hash>".to_string());
            }
            let network = args[2].clone();
            let code_hash = args[3].clone();
            let mut file = None;
            let mut signature = None;
            let mut i = 4;
            while i < args.len() {
                match args[i].as_str() {
                    "--file" | "-f" => {
                        if i + 1 < args.len() {
                            file = Some(PathBuf::from(&args[i + 1]));
                            i += 2;
                        } else {
                            return Err("--file requires a path".to_string());
                        }
                    }
                    "--signature" | "-s" => {
                        if i + 1 < args.len() {
                            signature = Some(args[i + 1].clone());
                            i += 2;
                        } else {
                            return Err("--signature requires a hex string".to_string());
                        }
                    }
                    other => return Err(format!("unknown argument: {}", other)),
                }
            }
            let file = file.ok_or("submit-metadata requires --file <metadata.json>")?;
            let signature = signature.ok_or("submit-metadata requires --signature <hex>")?;
            Ok(Command::SubmitMetadata {
                network,
                code_hash,
                file,
                signature,
            })
        }
        "sweep" => Ok(Command::Sweep),
        "version" | "--version" | "-V" => Ok(Command::Version),
        "help" | "--help" | "-h" => Ok(Command::Help),
        other => Err(format!("unknown command: {}", other)),
    }
}

// =============================================================================
// Composition Root
// =============================================================================

struct Services {
    config: Arc<VerifierConfig>,
    registry: Arc<ProcessRegistry>,
    executor: Arc<BuildExecutor>,
    source: Arc<RpcBytecodeSource>,
}

fn services() -> Services {
    let config = Arc::new(VerifierConfig::from_env());
    let registry = Arc::new(ProcessRegistry::new());
    let executor = Arc::new(BuildExecutor::new(
        Arc::clone(&config),
        Arc::clone(&registry),
    ));
    let source = Arc::new(RpcBytecodeSource::from_config(&config));

    Services {
        config,
        registry,
        executor,
        source,
    }
}

/// Installs the shutdown handler that drains the process registry before
/// exiting with the signal's conventional exit code.
fn install_shutdown_handler(registry: Arc<ProcessRegistry>) {
    tokio::spawn(async move {
        let exit_code = wait_for_shutdown_signal().await;
        let terminated = registry.terminate_all();
        info!("terminated {} build process/es on shutdown", terminated);
        std::process::exit(exit_code);
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> i32 {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return 130;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => 130,
        _ = term.recv() => 143,
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> i32 {
    let _ = tokio::signal::ctrl_c().await;
    130
}

// =============================================================================
// Command Implementations
// =============================================================================

async fn cmd_verify(network: String, code_hash: String, package: PathBuf) -> Result<(), String> {
    let services = services();
    install_shutdown_handler(Arc::clone(&services.registry));

    let locations = VerifierLocations::new(&services.config, &network, &code_hash)
        .map_err(|e| e.to_string())?;
    let job = VerificationJob::new(
        locations,
        Arc::clone(&services.executor),
        services.source.clone(),
    );

    let archive = tokio::fs::File::open(&package)
        .await
        .map_err(|e| format!("cannot open {}: {}", package.display(), e))?;

    job.submit(archive).await.map_err(|e| e.to_string())?;
    info!("workload admitted for {}", job.locations().code_hash_path());

    // Poll until the in-flight directories resolve; builds have no timeout,
    // so this runs until the container exits or the operator interrupts.
    loop {
        let locs = job.locations();
        if !locs.staging_dir.exists() && !locs.processing_dir.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    let info = job.locations().info();
    println!(
        "{}",
        serde_json::to_string_pretty(&info).map_err(|e| e.to_string())?
    );

    match info.status {
        contract_verifier::VerificationStatus::Verified
        | contract_verifier::VerificationStatus::Metadata => Ok(()),
        status => Err(format!(
            "verification ended with status '{}'; see {} for the build log",
            status,
            job.locations().error_dir.display()
        )),
    }
}

fn cmd_status(network: String, code_hash: String) -> Result<(), String> {
    let config = VerifierConfig::from_env();
    let locations =
        VerifierLocations::new(&config, &network, &code_hash).map_err(|e| e.to_string())?;

    let info = locations.info();
    println!(
        "{}",
        serde_json::to_string_pretty(&info).map_err(|e| e.to_string())?
    );
    Ok(())
}

async fn cmd_submit_metadata(
    network: String,
    code_hash: String,
    file: PathBuf,
    signature: String,
) -> Result<(), String> {
    let services = services();

    let locations = VerifierLocations::new(&services.config, &network, &code_hash)
        .map_err(|e| e.to_string())?;

    let reader = tokio::fs::File::open(&file)
        .await
        .map_err(|e| format!("cannot open {}: {}", file.display(), e))?;

    metadata::verify_and_publish_metadata(
        &locations,
        &services.config,
        services.source.as_ref(),
        reader,
        &signature,
    )
    .await
    .map_err(|e| e.to_string())?;

    println!("published metadata for {}", locations.code_hash_path());
    Ok(())
}

fn cmd_sweep() -> Result<(), String> {
    let config = VerifierConfig::from_env();
    job::sweep_stale(&config);
    Ok(())
}

fn cmd_version() {
    println!("contract-verifier {}", env!("CARGO_PKG_VERSION"));
}

fn cmd_help() {
    println!(
        r#"contract-verifier - reproducible-build verification for contract bytecode

USAGE:
    verifier verify <network> <code-hash> --package <archive>
    verifier status <network> <code-hash>
    verifier submit-metadata <network> <code-hash> --file <metadata.json> --signature <hex>
    verifier sweep
    verifier version

COMMANDS:
    verify           Run the full verification pipeline on a local archive
                     (zip, tar.gz, or tar.bz2) and wait for the build result
    status           Print the verification status for a code hash
    submit-metadata  Publish an owner-signed metadata.json without sources
    sweep            Remove stale staging/processing work from an unclean
                     shutdown; run before starting service use

ENVIRONMENT:
    BASE_DIR, PUBLISH_DIR, CACHES_DIR, TMP_DIR, MAX_CONTAINERS,
    MAX_PACKAGE_BYTES, CONTAINER_ENGINE, VERIFIER_IMAGE,
    CONTAINER_RUN_PARAMS, CHAIN_ENDPOINTS, RUST_LOG

EXAMPLE:
    verifier verify rococoContracts 0x5160...e1f95 --package ./package.zip
"#
    );
}

// =============================================================================
// Main
// =============================================================================

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cmd = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("error: {}", e);
            cmd_help();
            return ExitCode::FAILURE;
        }
    };

    let result = match cmd {
        Command::Verify {
            network,
            code_hash,
            package,
        } => run_async(cmd_verify(network, code_hash, package)),
        Command::Status { network, code_hash } => cmd_status(network, code_hash),
        Command::SubmitMetadata {
            network,
            code_hash,
            file,
            signature,
        } => run_async(cmd_submit_metadata(network, code_hash, file, signature)),
        Command::Sweep => cmd_sweep(),
        Command::Version => {
            cmd_version();
            Ok(())
        }
        Command::Help => {
            cmd_help();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_async(fut: impl std::future::Future<Output = Result<(), String>>) -> Result<(), String> {
    tokio::runtime::Runtime::new()
        .map_err(|e| format!("failed to start async runtime: {}", e))?
        .block_on(fut)
}
