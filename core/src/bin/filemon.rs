use filemon_core::{
	config::{default_data_dir, MonitorConfig},
	logging::init_logging,
	ScanOptions,
};

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "filemon", about = "Monitor locations for file changes", version)]
struct Args {
	/// Data directory holding filemon.json, baselines and logs
	#[arg(long, global = true, env = "FILEMON_DATA_DIR")]
	data_dir: Option<PathBuf>,

	/// Explicit config file, instead of <data-dir>/filemon.json
	#[arg(long, global = true)]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Start every location and run until Ctrl-C
	Run,
	/// Scan one location once and print what changed
	Scan {
		location: String,
		/// Report changes without committing the baseline
		#[arg(long)]
		dry_run: bool,
		/// Skip re-reading files whose size and mtime are unchanged
		#[arg(long)]
		trust_metadata: bool,
	},
	/// Print the status of every location
	Status,
}

fn load_config(args: &Args) -> Result<MonitorConfig> {
	if let Some(path) = &args.config {
		return MonitorConfig::load_file(path);
	}

	let data_dir = match &args.data_dir {
		Some(dir) => dir.clone(),
		None => default_data_dir()?,
	};

	MonitorConfig::load_from(&data_dir)
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();
	let config = load_config(&args)?;

	init_logging(&config.logs_dir(), &config.log_level).context("Failed to set up logging")?;

	let service = config.service_builder()?.build()?;

	match args.command {
		Commands::Run => {
			service.start().await?;
			info!(locations = ?service.location_names(), "Monitoring, press Ctrl-C to stop");

			signal::ctrl_c()
				.await
				.context("Failed to listen for Ctrl-C")?;

			info!(pending = service.queue_size(), "Shutting down");
			service.stop().await?;
		}
		Commands::Scan {
			location,
			dry_run,
			trust_metadata,
		} => {
			let options = ScanOptions {
				dry_run,
				trust_metadata,
				cancel: None,
			};
			let ctx = service.scan_location(&location, options, None).await?;

			for event in &ctx.events {
				println!(
					"{:<8} {} {}",
					event.event_type,
					event.path,
					event.size.map(|size| size.to_string()).unwrap_or_default()
				);
			}
			println!("{} change(s) in '{}'", ctx.events.len(), location);

			// Process what the scan queued before exiting
			if !dry_run && !ctx.events.is_empty() {
				service.start().await?;
				service
					.wait_for_queue_empty(std::time::Duration::from_secs(300))
					.await?;
				service.stop().await?;
			}
		}
		Commands::Status => {
			for (name, status) in service.all_location_status().await {
				println!("{name}: {}", serde_json::to_string(&status)?);
			}
		}
	}

	Ok(())
}
