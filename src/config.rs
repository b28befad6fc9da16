//! Configuration surface for the index: recognised options (§6, §12) and
//! the derivation of an immutable [`Geometry`](crate::geometry::Geometry)
//! from a target memory budget.

use crate::error::{ConfigError, Result};
use crate::geometry::{Geometry, MAX_ZONES, RECORD_SIZE};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration, deserializable from TOML with `UDS_`-prefixed
/// environment variable overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Volume sizing and sparse-region behaviour.
    pub volume: VolumeConfig,
    /// Zone and reader-thread parallelism.
    pub zones: ZonesConfig,
    /// Page cache and sparse cache capacities.
    pub cache: CacheConfig,
    /// Anti-rollback nonce embedded in every page header.
    pub security: SecurityConfig,
    /// Structured logging configuration.
    pub logging: LoggingConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

/// Volume sizing and sparse-region configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Path to the backing file or block device.
    pub data_path: PathBuf,
    /// Target RAM footprint in bytes; chapter count, records-per-chapter,
    /// and delta-memory sizes are derived from this.
    pub memory_size: u64,
    /// Bytes per physical page.
    pub bytes_per_page: u32,
    /// Enables the sparse-region cache and sparse sub-index.
    pub sparse: bool,
    /// Sampling denominator for the hook predicate. 0 disables sparse
    /// even if `sparse` is true; 1 makes every name a hook.
    pub sparse_sample_rate: u32,
    /// Fraction (0.0-1.0) of chapters considered sparse once `sparse` is enabled.
    pub sparse_chapter_fraction: f64,
    /// Configured mean delta between consecutive entries in a delta list,
    /// used to derive the Huffman coding parameters.
    pub mean_delta: u32,
}

/// Zone and reader-thread parallelism configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZonesConfig {
    /// Number of parallel index zones (0 = auto-detect from CPU count).
    pub zone_count: u32,
    /// Size of the volume reader-thread pool.
    pub read_threads: u32,
}

/// Page cache and sparse cache capacity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Page-cache and sparse-cache capacity, in chapters.
    pub cache_chapters: u32,
}

/// Anti-rollback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Nonce embedded in every page header; mismatches are treated as
    /// corruption rather than silently accepted (anti-rollback).
    pub nonce: u64,
}

/// Structured logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log format (json, pretty).
    pub format: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metric registration.
    pub enable_prometheus: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            volume: VolumeConfig::default(),
            zones: ZonesConfig::default(),
            cache: CacheConfig::default(),
            security: SecurityConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./uds-index.vol"),
            memory_size: 1024 * 1024 * 1024, // 1GB
            bytes_per_page: 4096,
            sparse: false,
            sparse_sample_rate: 0,
            sparse_chapter_fraction: 0.75,
            mean_delta: 4096,
        }
    }
}

impl Default for ZonesConfig {
    fn default() -> Self {
        Self {
            zone_count: 0, // auto-detect
            read_threads: 2,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { cache_chapters: 8 }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self { nonce: 0 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enable_prometheus: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults,
    /// then apply `UDS_`-prefixed environment variable overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.resolved_zone_count(); // touch to fail fast on bad overrides
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        use std::env;
        if let Ok(v) = env::var("UDS_MEMORY_SIZE") {
            self.volume.memory_size = v
                .parse()
                .map_err(|_| ConfigError::Parse(format!("invalid UDS_MEMORY_SIZE: {v}")))?;
        }
        if let Ok(v) = env::var("UDS_ZONE_COUNT") {
            self.zones.zone_count = v
                .parse()
                .map_err(|_| ConfigError::Parse(format!("invalid UDS_ZONE_COUNT: {v}")))?;
        }
        if let Ok(v) = env::var("UDS_SPARSE") {
            self.volume.sparse = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = env::var("UDS_LOG_LEVEL") {
            self.logging.level = v;
        }
        Ok(())
    }

    /// Resolve `zone_count`, auto-detecting from the CPU count when 0.
    pub fn resolved_zone_count(&self) -> u32 {
        if self.zones.zone_count == 0 {
            (num_cpus::get() as u32).clamp(1, MAX_ZONES)
        } else {
            self.zones.zone_count
        }
    }

    /// Validate the configuration and derive the on-disk geometry it implies.
    pub fn derive_geometry(&self) -> Result<Geometry> {
        let zone_count = self.resolved_zone_count();
        if zone_count == 0 || zone_count > MAX_ZONES {
            return Err(ConfigError::InvalidZoneCount(zone_count, MAX_ZONES).into());
        }

        let records_per_page = (self.volume.bytes_per_page as usize / RECORD_SIZE).max(1) as u32;

        // Budget the memory_size across record pages, reserving a fixed
        // fraction for index pages and delta-index overhead.
        const INDEX_PAGE_FRACTION: f64 = 0.15;
        let usable = self.volume.memory_size as f64 * (1.0 - INDEX_PAGE_FRACTION);
        let bytes_per_page = self.volume.bytes_per_page as f64;
        let total_record_pages = (usable / bytes_per_page).max(records_per_page as f64) as u64;

        // Pick chapters_per_volume so each chapter holds a reasonable
        // number of record pages (at least 1, capped for cache friendliness).
        let record_pages_per_chapter = 16u32;
        let chapters_per_volume =
            (total_record_pages / record_pages_per_chapter as u64).max(2) as u32;
        let index_pages_per_chapter = (record_pages_per_chapter / 8).max(1);

        let sparse_chapters_per_volume = if self.volume.sparse && self.volume.sparse_sample_rate > 0
        {
            ((chapters_per_volume as f64 * self.volume.sparse_chapter_fraction) as u32)
                .min(chapters_per_volume.saturating_sub(1))
                .max(1)
        } else {
            0
        };

        let geometry = Geometry::new(
            self.volume.bytes_per_page,
            records_per_page,
            record_pages_per_chapter,
            index_pages_per_chapter,
            chapters_per_volume,
            sparse_chapters_per_volume,
            if self.volume.sparse {
                self.volume.sparse_sample_rate
            } else {
                0
            },
        )?;

        let computed = compute_index_size_from_geometry(&geometry);
        if computed > self.volume.memory_size * 2 {
            // Only reject wildly-oversized derivations; the 15% index
            // reservation above is a heuristic, not an exact accounting.
            return Err(ConfigError::DoesNotFitBudget {
                computed,
                budget: self.volume.memory_size,
            }
            .into());
        }

        Ok(geometry)
    }
}

/// Compute the on-disk byte size implied by a configuration, without
/// constructing an index (§6 `compute_index_size`).
pub fn compute_index_size(config: &Config) -> Result<u64> {
    let geometry = config.derive_geometry()?;
    Ok(compute_index_size_from_geometry(&geometry))
}

fn compute_index_size_from_geometry(geometry: &Geometry) -> u64 {
    geometry.volume_region_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_derives_valid_geometry() {
        let config = Config::default();
        let geometry = config.derive_geometry().expect("valid geometry");
        assert!(geometry.chapters_per_volume >= 2);
        assert_eq!(
            geometry.pages_per_chapter(),
            geometry.index_pages_per_chapter + geometry.record_pages_per_chapter
        );
    }

    #[test]
    fn zero_sample_rate_disables_sparse_even_if_requested() {
        let mut config = Config::default();
        config.volume.sparse = true;
        config.volume.sparse_sample_rate = 0;
        let geometry = config.derive_geometry().unwrap();
        assert!(!geometry.is_sparse());
    }

    #[test]
    fn sample_rate_one_with_sparse_enabled_makes_every_name_a_hook() {
        let mut config = Config::default();
        config.volume.sparse = true;
        config.volume.sparse_sample_rate = 1;
        let geometry = config.derive_geometry().unwrap();
        assert!(geometry.is_sparse());
        assert_eq!(geometry.sparse_sample_rate, 1);
    }

    #[test]
    fn compute_index_size_is_pure_and_stable() {
        let config = Config::default();
        let a = compute_index_size(&config).unwrap();
        let b = compute_index_size(&config).unwrap();
        assert_eq!(a, b);
    }
}
