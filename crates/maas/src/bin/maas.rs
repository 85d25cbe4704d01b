//! MAAS CLI - offline checks for provider settings and resource declarations.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use maas::config::{from_attributes, DeploymentConfig, MachineConfig};
use maas::logging::{init_logging, LogFormat};
use maas::settings::ProviderConfig;
use maas::state::user_data_digest;
use maas::ResourceKind;

/// Check MAAS provider settings and declarations without touching MAAS.
#[derive(Parser)]
#[command(name = "maas")]
#[command(about = "Validate MAAS provider configuration")]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Emit logs as JSON.
    #[arg(long, default_value = "false")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load provider settings and print the resolved endpoints.
    Config {
        /// Provider settings file (YAML).
        #[arg(long, default_value = "maas.yaml")]
        config: PathBuf,
    },

    /// Validate a resource declaration (YAML or JSON).
    Validate {
        /// Resource type (`maas_machine` or `maas_deployment`).
        #[arg(long)]
        kind: String,

        /// Declaration file.
        #[arg(long)]
        file: PathBuf,
    },

    /// Print the digest stored in state for a user data file.
    Digest {
        /// Cloud-init user data file.
        #[arg(long)]
        file: PathBuf,
    },
}

fn read_declaration(path: &Path) -> Result<serde_json::Value> {
    let content =
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
    // YAML is a superset of JSON.
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_logging(cli.verbose, format)?;

    match cli.command {
        Commands::Config { config } => {
            let settings = ProviderConfig::load(&config)?;
            let endpoint = settings.endpoint()?;
            println!("\nMAAS endpoint");
            println!("{}", "-".repeat(40));
            println!("  URL:          {}", endpoint.url);
            println!("  API version:  {}", endpoint.api_version);
            println!(
                "  API key:      {}",
                if endpoint.api_key.is_some() { "set" } else { "missing" }
            );
            for owner in settings.owner_endpoints()?.keys() {
                println!("  Deploy token: {owner}");
            }
            let timeouts = settings.timeouts;
            println!("\nTimeouts (timeout/delay/min interval, seconds)");
            println!("{}", "-".repeat(40));
            for (name, timing) in [
                ("machine_appear", timeouts.machine_appear),
                ("commission", timeouts.commission),
                ("deploy", timeouts.deploy),
                ("release", timeouts.release),
            ] {
                println!(
                    "  {name:<15} {}/{}/{}",
                    timing.timeout_secs, timing.delay_secs, timing.min_interval_secs
                );
            }
        }

        Commands::Validate { kind, file } => {
            let kind: ResourceKind = kind.parse()?;
            let declared = read_declaration(&file)?;
            match kind {
                ResourceKind::Machine => {
                    let machine: MachineConfig = from_attributes(declared)?;
                    machine.validate()?;
                    info!(
                        mac = %machine.mac_address,
                        interfaces = machine.interfaces.len(),
                        block_devices = machine.block_devices.len(),
                        volume_groups = machine.volume_groups.len(),
                        "Machine declaration is valid"
                    );
                }
                ResourceKind::Deployment => {
                    let deployment: DeploymentConfig = from_attributes(declared)?;
                    deployment.validate()?;
                    info!(
                        owner = deployment.owner.as_deref().unwrap_or("default"),
                        "Deployment declaration is valid"
                    );
                }
            }
            println!("{} {}: OK", kind, file.display());
        }

        Commands::Digest { file } => {
            let user_data = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            println!("{}", user_data_digest(&user_data));
        }
    }

    Ok(())
}
