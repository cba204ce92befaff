use clap::{Parser, Subcommand};
use std::path::Path;
use tracing_subscriber::EnvFilter;

use marchgrid::cli::commands;
use marchgrid::config::{ScenarioParams, ServiceConfig};
use marchgrid::crisis::generation::{generate_dataset, print_dataset_summary};
use marchgrid::crisis::Coords;
use marchgrid::persistence::{self, SnapshotDir};

#[derive(Parser)]
#[command(name = "marchgrid")]
#[command(about = "Division movement over crisis cost grids: route planning and scheduled ticks")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new crisis dataset from procedural parameters
    Generate {
        /// Path to scenario parameters file
        #[arg(short, long, default_value = "scenario.toml")]
        scenario: String,

        /// Output snapshot directory
        #[arg(short, long, default_value = "snapshots")]
        output: String,
    },

    /// Start the movement service
    Run {
        /// Path to a specific snapshot to load
        #[arg(short, long)]
        snapshot: Option<String>,
    },

    /// Plan a route for a division against the latest snapshot
    Plan {
        /// Division to route
        #[arg(short, long)]
        division: u32,

        /// Destinations in order, each as x,y
        #[arg(short, long, num_args = 1.., required = true, value_parser = commands::parse_coords)]
        to: Vec<Coords>,
    },

    /// Inspect a division or a crisis
    Inspect {
        /// Division ID to inspect
        #[arg(short, long)]
        division: Option<u32>,

        /// Crisis ID to inspect
        #[arg(long)]
        crisis: Option<u32>,
    },

    /// Manage dataset snapshots
    Snapshots {
        #[command(subcommand)]
        action: SnapshotAction,
    },
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// List available snapshots
    List {
        /// Snapshot directory
        #[arg(short, long, default_value = "snapshots")]
        dir: String,
    },

    /// Restore and display a dataset from a snapshot file
    Restore {
        /// Path to the snapshot file
        file: String,
    },
}

/// Load the service config. A missing file at the default path means defaults.
fn load_config(path: &str) -> ServiceConfig {
    let config_path = Path::new(path);
    if path == "config.toml" && !config_path.exists() {
        return ServiceConfig::default();
    }
    match ServiceConfig::from_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(config: &ServiceConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if config.log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = load_config(&cli.config);
    init_logging(&config);

    match cli.command {
        Commands::Generate { scenario, output } => {
            let params = match ScenarioParams::from_file(Path::new(&scenario)) {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("Error loading scenario: {}", e);
                    std::process::exit(1);
                }
            };
            println!("Generating crisis from {}...", scenario);
            let data = generate_dataset(&params);
            print_dataset_summary(&data);

            let snapshots = SnapshotDir::new(&output, config.max_snapshots as usize);
            match snapshots.save(&data) {
                Ok(saved) => println!("\nDataset saved to {}", saved.path.display()),
                Err(e) => {
                    eprintln!("Cannot save snapshot: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Run { snapshot } => {
            if let Err(e) = commands::run_service(&config, snapshot.as_deref()).await {
                eprintln!("Service error: {}", e);
                std::process::exit(1);
            }
        }

        Commands::Plan { division, to } => {
            if let Err(e) = commands::plan(&config, division, &to) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }

        Commands::Inspect { division, crisis } => {
            if let Err(e) = commands::inspect(&config, division, crisis) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }

        Commands::Snapshots { action } => match action {
            SnapshotAction::List { dir } => {
                let snapshot_dir = SnapshotDir::new(&dir, config.max_snapshots as usize);
                match snapshot_dir.list() {
                    Ok(snapshots) => {
                        if snapshots.is_empty() {
                            println!("No snapshots found in {}", snapshot_dir.root().display());
                        } else {
                            println!("{:<40} {:>8} {:>12}", "File", "Tick", "Size");
                            println!("{}", "-".repeat(62));
                            for s in &snapshots {
                                println!(
                                    "{:<40} {:>8} {:>9} KB",
                                    s.name.to_string(),
                                    s.name.tick,
                                    s.file_size / 1024
                                );
                            }
                            println!(
                                "\n{} snapshot(s) in {}",
                                snapshots.len(),
                                snapshot_dir.root().display()
                            );
                        }
                    }
                    Err(e) => {
                        eprintln!("Error listing snapshots: {}", e);
                        std::process::exit(1);
                    }
                }
            }
            SnapshotAction::Restore { file } => {
                let path = Path::new(&file);
                match persistence::load_snapshot(path) {
                    Ok(data) => {
                        println!("Restored dataset from {}", path.display());
                        print_dataset_summary(&data);
                    }
                    Err(e) => {
                        eprintln!("Error restoring snapshot: {}", e);
                        std::process::exit(1);
                    }
                }
            }
        },
    }
}
