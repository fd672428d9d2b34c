//! On-disk configuration

use crate::{
	baseline::JsonBaselineStore,
	location::{IgnoreRules, Location},
	pipeline::{MirrorProcessor, RetryPolicy},
	service::ServiceBuilder,
	storage::{LocalStorage, StorageProvider},
	watch::NotifyWatchProvider,
};

use std::{
	collections::HashSet,
	fs,
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use filemon_fs_watcher::WatcherConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const CONFIG_FILE: &str = "filemon.json";
const CONFIG_VERSION: u32 = 1;

/// Platform data directory for the daemon
pub fn default_data_dir() -> Result<PathBuf> {
	let dir = dirs::data_local_dir()
		.ok_or_else(|| anyhow!("Could not determine data directory"))?
		.join("filemon");

	fs::create_dir_all(&dir)
		.with_context(|| format!("Failed to create data directory {}", dir.display()))?;

	Ok(dir)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
	/// Config schema version
	pub version: u32,

	pub data_dir: PathBuf,

	/// Default filter when `RUST_LOG` is unset
	pub log_level: String,

	#[serde(default)]
	pub retry: RetryPolicy,

	#[serde(default)]
	pub watcher: WatcherSettings,

	#[serde(default)]
	pub locations: Vec<LocationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
	pub stabilization_ms: u64,
	pub tick_interval_ms: u64,
	pub buffer_size: usize,
}

impl Default for WatcherSettings {
	fn default() -> Self {
		let defaults = WatcherConfig::default();
		Self {
			stabilization_ms: defaults.stabilization.as_millis() as u64,
			tick_interval_ms: defaults.tick_interval.as_millis() as u64,
			buffer_size: defaults.buffer_size,
		}
	}
}

impl From<&WatcherSettings> for WatcherConfig {
	fn from(settings: &WatcherSettings) -> Self {
		Self {
			stabilization: Duration::from_millis(settings.stabilization_ms),
			tick_interval: Duration::from_millis(settings.tick_interval_ms),
			buffer_size: settings.buffer_size,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
	pub name: String,
	pub root: PathBuf,
	#[serde(default)]
	pub watch: bool,
	#[serde(default)]
	pub scan_interval_secs: Option<u64>,
	/// Enabled processor names in order, empty enables all of them
	#[serde(default)]
	pub processors: Vec<String>,
	#[serde(default)]
	pub ignore: Vec<String>,
	/// Mirror the location into this directory
	#[serde(default)]
	pub mirror_to: Option<PathBuf>,
}

impl LocationConfig {
	pub fn to_location(&self) -> Location {
		let mut location = Location::new(self.name.as_str(), &self.root)
			.watched(self.watch)
			.with_processors(self.processors.iter().cloned())
			.with_ignore(self.ignore.iter().cloned());

		if let Some(secs) = self.scan_interval_secs {
			location = location.with_scan_interval(Duration::from_secs(secs));
		}

		location
	}
}

impl MonitorConfig {
	pub fn load() -> Result<Self> {
		Self::load_from(&default_data_dir()?)
	}

	/// Load `filemon.json` from `data_dir`, writing a default one if missing
	pub fn load_from(data_dir: &Path) -> Result<Self> {
		let config_path = data_dir.join(CONFIG_FILE);

		if !config_path.exists() {
			warn!(path = %config_path.display(), "No config found, creating default");
			let config = Self::default_with_dir(data_dir.to_path_buf());
			config.save()?;
			return Ok(config);
		}

		Self::load_file(&config_path)
	}

	/// Load an explicit config file
	pub fn load_file(config_path: &Path) -> Result<Self> {
		info!(path = %config_path.display(), "Loading config");
		let json = fs::read_to_string(config_path)
			.with_context(|| format!("Failed to read {}", config_path.display()))?;
		let config: Self = serde_json::from_str(&json)
			.with_context(|| format!("Failed to parse {}", config_path.display()))?;

		if config.version > CONFIG_VERSION {
			bail!("Unknown config version: {}", config.version);
		}

		config.validate()?;
		Ok(config)
	}

	/// Fall back to a fresh default when the existing file is unusable
	pub fn load_or_create(data_dir: &Path) -> Result<Self> {
		Self::load_from(data_dir).or_else(|e| {
			warn!(?e, "Failed to load config, replacing it with defaults");
			let config = Self::default_with_dir(data_dir.to_path_buf());
			config.save()?;
			Ok(config)
		})
	}

	pub fn default_with_dir(data_dir: PathBuf) -> Self {
		Self {
			version: CONFIG_VERSION,
			data_dir,
			log_level: "info".to_string(),
			retry: RetryPolicy::default(),
			watcher: WatcherSettings::default(),
			locations: Vec::new(),
		}
	}

	pub fn save(&self) -> Result<()> {
		fs::create_dir_all(&self.data_dir)
			.with_context(|| format!("Failed to create {}", self.data_dir.display()))?;

		let config_path = self.data_dir.join(CONFIG_FILE);
		let json = serde_json::to_string_pretty(self)?;
		fs::write(&config_path, json)
			.with_context(|| format!("Failed to write {}", config_path.display()))?;

		info!(path = %config_path.display(), "Saved config");
		Ok(())
	}

	pub fn validate(&self) -> Result<()> {
		if self.retry.max_attempts == 0 {
			bail!("retry.max_attempts must be at least 1");
		}

		let mut names = HashSet::with_capacity(self.locations.len());
		for location in &self.locations {
			if location.name.trim().is_empty() {
				bail!("Location names must not be empty");
			}
			if !names.insert(location.name.as_str()) {
				bail!("Location <name='{}'> is configured twice", location.name);
			}
			IgnoreRules::new(&location.ignore)
				.with_context(|| format!("Invalid ignore patterns for location <name='{}'>", location.name))?;
		}

		Ok(())
	}

	pub fn logs_dir(&self) -> PathBuf {
		self.data_dir.join("logs")
	}

	pub fn baselines_dir(&self) -> PathBuf {
		self.data_dir.join("baselines")
	}

	/// Wire local storage, JSON baselines, the `notify` watcher and mirroring
	pub fn service_builder(&self) -> Result<ServiceBuilder> {
		self.validate()?;

		let mut builder = ServiceBuilder::new()
			.baseline_store(Arc::new(JsonBaselineStore::new(self.baselines_dir())))
			.watch_provider(Arc::new(NotifyWatchProvider::new((&self.watcher).into())))
			.retry_policy(self.retry);

		let mut mirror = MirrorProcessor::new();
		for location in &self.locations {
			let storage: Arc<dyn StorageProvider> = Arc::new(LocalStorage::new(&location.root));
			if let Some(target) = &location.mirror_to {
				mirror = mirror.with_target(
					location.name.as_str(),
					Arc::clone(&storage),
					Arc::new(LocalStorage::new(target)),
				);
			}
			builder = builder.location(location.to_location(), storage);
		}

		if !mirror.is_empty() {
			builder = builder.processor(Arc::new(mirror));
		}

		Ok(builder)
	}
}
