use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// shardprov - declarative shard-topology provisioning
#[derive(Parser)]
#[command(name = "shardprov")]
#[command(about = "Provision collections, indexes and shard ranges from a topology file")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bring the cluster to the state declared in a topology file
    Provision {
        /// Topology file (JSON)
        #[arg(short, long)]
        spec: PathBuf,

        /// Cluster state file the admin commands are applied to
        #[arg(long)]
        cluster: PathBuf,

        /// Provision independent collections concurrently
        #[arg(long)]
        parallel: bool,

        /// Inspect the cluster and report what would change, without changing it
        #[arg(long)]
        dry_run: bool,

        /// Runtime configuration file (retries, timeouts, parallelism)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the run report as JSON instead of the summary
        #[arg(long)]
        json: bool,
    },
    /// Validate a topology file and list every problem found
    Validate {
        /// Topology file (JSON)
        #[arg(short, long)]
        spec: PathBuf,
    },
    /// Print the operation plan for a topology without applying it
    Plan {
        /// Topology file (JSON)
        #[arg(short, long)]
        spec: PathBuf,

        /// Cluster state file providing the shard directory
        #[arg(long)]
        cluster: PathBuf,

        /// Print admin command documents instead of the summary
        #[arg(long)]
        commands: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["shardprov"]).is_err());
    }

    #[test]
    fn test_cli_provision_flags() {
        let cli = Cli::try_parse_from([
            "shardprov",
            "provision",
            "--spec",
            "/path/to/topology.json",
            "--cluster",
            "/path/to/cluster.json",
            "--parallel",
            "--dry-run",
            "--json",
        ])
        .expect("valid arguments");
        match cli.command {
            Commands::Provision {
                spec,
                cluster,
                parallel,
                dry_run,
                config,
                json,
            } => {
                assert_eq!(spec.to_str().unwrap(), "/path/to/topology.json");
                assert_eq!(cluster.to_str().unwrap(), "/path/to/cluster.json");
                assert!(parallel);
                assert!(dry_run);
                assert!(config.is_none());
                assert!(json);
            }
            _ => panic!("Expected Provision command"),
        }
    }

    #[test]
    fn test_cli_provision_defaults() {
        let cli = Cli::try_parse_from([
            "shardprov",
            "provision",
            "-s",
            "topology.json",
            "--cluster",
            "cluster.json",
            "-c",
            "provision.json",
        ])
        .expect("valid arguments");
        match cli.command {
            Commands::Provision {
                parallel,
                dry_run,
                config,
                json,
                ..
            } => {
                assert!(!parallel);
                assert!(!dry_run);
                assert!(!json);
                assert_eq!(config.unwrap().to_str().unwrap(), "provision.json");
            }
            _ => panic!("Expected Provision command"),
        }
    }

    #[test]
    fn test_cli_provision_requires_spec() {
        let result = Cli::try_parse_from(["shardprov", "provision", "--cluster", "c.json"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_validate_command() {
        let cli = Cli::try_parse_from(["shardprov", "validate", "--spec", "/path/to/topology.json"])
            .expect("valid arguments");
        match cli.command {
            Commands::Validate { spec } => {
                assert_eq!(spec.to_str().unwrap(), "/path/to/topology.json");
            }
            _ => panic!("Expected Validate command"),
        }

        let short = Cli::try_parse_from(["shardprov", "validate", "-s", "topology.json"]);
        assert!(short.is_ok());
    }

    #[test]
    fn test_cli_validate_rejects_positional_spec() {
        let result = Cli::try_parse_from(["shardprov", "validate", "topology.json"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_plan_command() {
        let cli = Cli::try_parse_from([
            "shardprov",
            "plan",
            "--spec",
            "topology.json",
            "--cluster",
            "cluster.json",
            "--commands",
        ])
        .expect("valid arguments");
        assert!(matches!(cli.command, Commands::Plan { commands: true, .. }));
    }
}
