//! feed - digital preservation ingest pipeline
//!
//! The CLI wires the engine together from the configuration named by
//! `HTFEED_CONFIG`, and exposes the ingest driver plus the diagnostic
//! surface: `--version` for the banner, `--Version` for the banner with
//! every loaded namespace, package type and stage.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

use feed_config::Config;
use feed_core::{Engine, JobParams, Registry, Runner, Status};

#[derive(Parser)]
#[command(name = "feed")]
#[command(about = "Digital preservation ingest pipeline")]
#[command(long_about = "\
feed validates submitted information packages, drives each volume through \
its package type's stage map, assembles an archival METS with merged PREMIS \
provenance, and collates the result into the pairtree object store.

Configuration is loaded from the YAML document named by HTFEED_CONFIG.")]
#[command(version)]
struct Cli {
    /// Print the banner plus every loaded namespace, package type and
    /// stage, then exit.
    #[arg(long = "Version")]
    full_version: bool,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one or more volumes to a release state.
    Ingest {
        /// Namespace identifier, e.g. `mdp`.
        namespace: String,
        /// Package type identifier, e.g. `google`.
        packagetype: String,
        /// Object identifiers to ingest.
        #[arg(required = true)]
        objids: Vec<String>,
        /// Starting status.
        #[arg(long, default_value = "ready")]
        status: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "feed=debug,info" } else { "feed=info,warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_engine() -> Result<Arc<Engine>> {
    let config = Config::from_env().context("loading configuration")?;
    let mut registry = Registry::new();
    feed_stages::install(&mut registry).context("registering descriptors")?;
    let engine =
        Engine::with_default_stores(config, registry).context("building engine")?;
    engine
        .check_descriptors()
        .context("validating descriptors")?;
    Ok(engine)
}

fn print_full_version(engine: &Engine) {
    println!("feed {}", env!("CARGO_PKG_VERSION"));

    println!("\nNamespaces:");
    for namespace in engine.registry().namespaces() {
        println!("  {:<12} {}", namespace.identifier, namespace.description);
    }

    println!("\nPackage types:");
    for packagetype in engine.registry().packagetypes() {
        println!("  {:<12} {}", packagetype.identifier, packagetype.description);
    }

    println!("\nStages:");
    for stage in engine.registry().stages() {
        println!("  {:<16} {}", stage.identifier(), stage.description());
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.full_version {
        let engine = build_engine()?;
        print_full_version(&engine);
        return Ok(ExitCode::SUCCESS);
    }

    let Some(command) = cli.command else {
        println!("feed {}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    };

    match command {
        Command::Ingest {
            namespace,
            packagetype,
            objids,
            status,
        } => {
            let engine = build_engine()?;
            let runner = Runner::new(Arc::clone(&engine));
            let batch: Vec<JobParams> = objids
                .iter()
                .map(|objid| {
                    let mut params = JobParams::new(&namespace, &packagetype, objid);
                    params.status = Status::new(&status);
                    params
                })
                .collect();

            let mut failed = false;
            for (objid, result) in objids.iter().zip(runner.run_batch(batch)?) {
                match result {
                    Ok(update) => {
                        println!("{namespace}.{objid}: {}", update.status);
                        failed |= update.failed;
                    }
                    Err(e) => {
                        error!(namespace = %namespace, objid = %objid, error = %e, "ingest error");
                        failed = true;
                    }
                }
            }
            Ok(if failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("feed: {e:#}");
            ExitCode::FAILURE
        }
    }
}
