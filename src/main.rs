//! shardprov - command-line entry point
//!
//! Logs go to stderr; reports, plans and command documents go to stdout.

use anyhow::{Context, Result};
use std::path::Path;
use std::process;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use shardprov::cli::{Cli, Commands};
use shardprov::{
    init_signal_handlers, CancelToken, ProvisionConfig, Provisioner, RunReport, StateFileCluster,
    StepStatus, TopologySpec, EXIT_FAILURE, EXIT_INVALID_SPEC, EXIT_SUCCESS,
};

/// Initialize the tracing subscriber. `RUST_LOG` overrides the default `info`.
fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_logger();

    let cli = Cli::parse_args();
    debug!("CLI arguments parsed");

    let code = match cli.command {
        Commands::Validate { spec } => validate(&spec),
        Commands::Plan {
            spec,
            cluster,
            commands,
        } => plan(&spec, &cluster, commands),
        Commands::Provision {
            spec,
            cluster,
            parallel,
            dry_run,
            config,
            json,
        } => provision(&spec, &cluster, parallel, dry_run, config.as_deref(), json),
    };

    process::exit(code);
}

/// Load a topology file; an unreadable or malformed file counts as an invalid spec.
fn load_topology(path: &Path) -> Option<TopologySpec> {
    match TopologySpec::load_from_file(path) {
        Ok(spec) => Some(spec),
        Err(e) => {
            error!("Failed to load topology: {:#}", e);
            eprintln!("✗ Failed to load topology: {:#}", e);
            None
        }
    }
}

fn validate(spec_path: &Path) -> i32 {
    info!("Validating topology file: {:?}", spec_path);
    let Some(spec) = load_topology(spec_path) else {
        return EXIT_INVALID_SPEC;
    };

    let violations = spec.validate();
    if violations.is_empty() {
        println!(
            "✓ Topology is valid: {} ({} collections)",
            spec.database,
            spec.collections.len()
        );
        return EXIT_SUCCESS;
    }

    eprintln!("✗ Topology has {} problem(s):", violations.len());
    for violation in &violations {
        eprintln!("  - {}", violation);
    }
    EXIT_INVALID_SPEC
}

fn plan(spec_path: &Path, cluster_path: &Path, commands: bool) -> i32 {
    let Some(spec) = load_topology(spec_path) else {
        return EXIT_INVALID_SPEC;
    };
    let cluster = match StateFileCluster::open(cluster_path) {
        Ok(cluster) => cluster,
        Err(e) => {
            eprintln!("✗ {:#}", e);
            return EXIT_FAILURE;
        }
    };

    match Provisioner::new(&cluster).plan(&spec) {
        Ok(plan) if commands => {
            for command in plan.to_commands() {
                println!("{}", command);
            }
            EXIT_SUCCESS
        }
        Ok(plan) => {
            println!("{}", plan.summary());
            EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("✗ {}", e);
            e.exit_code()
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<ProvisionConfig> {
    let config = match path {
        Some(path) => ProvisionConfig::load_from_file(path)?,
        None => ProvisionConfig::default(),
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn provision(
    spec_path: &Path,
    cluster_path: &Path,
    parallel: bool,
    dry_run: bool,
    config_path: Option<&Path>,
    json: bool,
) -> i32 {
    let cancel = CancelToken::new();
    if let Err(e) = init_signal_handlers(cancel.clone()) {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ {:#}", e);
            return EXIT_FAILURE;
        }
    };
    let Some(spec) = load_topology(spec_path) else {
        return EXIT_INVALID_SPEC;
    };
    let cluster = match StateFileCluster::open(cluster_path) {
        Ok(cluster) => cluster,
        Err(e) => {
            eprintln!("✗ {:#}", e);
            return EXIT_FAILURE;
        }
    };

    let report = match Provisioner::new(&cluster)
        .with_config(config)
        .dry_run(dry_run)
        .parallel(parallel)
        .with_cancel_token(cancel)
        .run(&spec)
    {
        Ok(report) => report,
        Err(e) => {
            error!("Provisioning did not start: {}", e);
            eprintln!("✗ {}", e);
            return e.exit_code();
        }
    };

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("✗ Failed to serialize report: {}", e);
                return EXIT_FAILURE;
            }
        }
    } else if dry_run {
        print_pending_commands(&report);
    }

    if dry_run {
        debug!("Dry run, cluster state left untouched");
    } else if let Err(e) = cluster.persist() {
        eprintln!("✗ Failed to save cluster state: {:#}", e);
        return EXIT_FAILURE;
    } else {
        info!("Cluster state saved to {:?}", cluster.path());
    }

    if report.is_success() {
        if !json {
            println!("{}", report.summary());
            println!("✓ Topology applied");
        }
    } else {
        if !json {
            println!("{}", report.summary());
        }
        eprintln!("✗ Some collections did not reach their target stage; rerun to resume");
    }
    report.exit_code()
}

/// Dry run output: the admin commands a real run would issue.
fn print_pending_commands(report: &RunReport) {
    for collection in &report.collections {
        for step in &collection.steps {
            if step.status == StepStatus::WouldApply {
                println!("{}", step.operation.to_command(&report.database));
            }
        }
    }
}
