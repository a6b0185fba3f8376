//! Configuration structures for Orderline
//!
//! This module defines the configuration for the inference pipeline, the demo
//! workload and observability. Configurations are loaded from YAML or JSON
//! files and can be built from environment variables.

use crate::error::{OrderlineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for Orderline components
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderlineConfig {
    /// Pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Simulated workload (used by the demo binary and benchmarks)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<WorkloadConfig>,

    /// Observability configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

/// Worker pool and admission configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Explicit number of workers. When unset, one worker per device
    /// (or a single CPU worker when there are no devices).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_workers: Option<usize>,

    /// Number of accelerator devices to spread workers across (0 = CPU only)
    #[serde(default)]
    pub num_devices: usize,

    /// Items to keep in flight per worker for the suggested pipeline depth
    #[serde(default = "default_depth_factor")]
    pub depth_factor: usize,

    /// Maximum submitted-but-not-retrieved items; unset means unbounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pending: Option<usize>,

    /// Stack size for worker threads in KiB (unset = platform default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_stack_kb: Option<usize>,
}

/// Simulated workload for the demo binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Number of items to push through the pipeline
    #[serde(default = "default_items")]
    pub items: u64,

    /// Lower bound of the simulated per-item latency
    #[serde(default = "default_min_latency")]
    pub min_latency_ms: u64,

    /// Upper bound of the simulated per-item latency
    #[serde(default = "default_max_latency")]
    pub max_latency_ms: u64,

    /// Fail every n-th item (0 = never)
    #[serde(default)]
    pub failure_every: u64,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Dump pipeline metrics when the demo finishes
    #[serde(default = "default_metrics")]
    pub enable_metrics: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_workers: None,
            num_devices: 0,
            depth_factor: default_depth_factor(),
            max_pending: None,
            thread_stack_kb: None,
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            items: default_items(),
            min_latency_ms: default_min_latency(),
            max_latency_ms: default_max_latency(),
            failure_every: 0,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enable_metrics: default_metrics(),
        }
    }
}

/// Default value functions
fn default_depth_factor() -> usize {
    5
}

fn default_items() -> u64 {
    100
}

fn default_min_latency() -> u64 {
    5
}

fn default_max_latency() -> u64 {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics() -> bool {
    true
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl PipelineConfig {
    /// Pipeline with a fixed number of CPU workers
    pub fn with_workers(num_workers: usize) -> Self {
        Self {
            num_workers: Some(num_workers),
            ..Self::default()
        }
    }

    /// Number of workers the pool will spawn
    pub fn worker_count(&self) -> usize {
        self.num_workers.unwrap_or_else(|| self.num_devices.max(1))
    }

    /// Advisory number of items a caller should keep in flight
    pub fn suggested_depth(&self) -> usize {
        self.worker_count() * self.depth_factor
    }

    /// Validate pipeline settings
    pub fn validate(&self) -> Result<()> {
        if self.num_workers == Some(0) {
            return Err(OrderlineError::config("num_workers must be at least 1"));
        }
        if self.depth_factor == 0 {
            return Err(OrderlineError::config("depth_factor must be at least 1"));
        }
        if self.max_pending == Some(0) {
            return Err(OrderlineError::config("max_pending must be at least 1 when set"));
        }
        if self.thread_stack_kb == Some(0) {
            return Err(OrderlineError::config("thread_stack_kb must be at least 1 when set"));
        }
        Ok(())
    }
}

impl WorkloadConfig {
    /// Validate workload settings
    pub fn validate(&self) -> Result<()> {
        if self.min_latency_ms > self.max_latency_ms {
            return Err(OrderlineError::config(format!(
                "min_latency_ms ({}) exceeds max_latency_ms ({})",
                self.min_latency_ms, self.max_latency_ms
            )));
        }
        Ok(())
    }
}

impl OrderlineConfig {
    /// Load configuration from a YAML or JSON file (chosen by extension)
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            OrderlineError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config = Self::parse(&path, &content)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(path: &Path, content: &str) -> Result<Self> {
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            serde_json::from_str(content).map_err(|e| {
                OrderlineError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
            })
        } else {
            serde_yaml::from_str(content).map_err(|e| {
                OrderlineError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
            })
        }
    }

    /// Load configuration from `ORDERLINE_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str| -> Result<Option<usize>> {
            lookup(key)
                .map(|value| {
                    value.trim().parse::<usize>().map_err(|_| {
                        OrderlineError::Config(format!("Invalid value for {}: {:?}", key, value))
                    })
                })
                .transpose()
        };

        let mut pipeline = PipelineConfig::default();
        pipeline.num_workers = parse("ORDERLINE_WORKERS")?;
        if let Some(devices) = parse("ORDERLINE_DEVICES")? {
            pipeline.num_devices = devices;
        }
        if let Some(factor) = parse("ORDERLINE_DEPTH_FACTOR")? {
            pipeline.depth_factor = factor;
        }
        pipeline.max_pending = parse("ORDERLINE_MAX_PENDING")?;

        let observability = lookup("ORDERLINE_LOG_LEVEL").map(|log_level| ObservabilityConfig {
            log_level,
            ..ObservabilityConfig::default()
        });

        let config = OrderlineConfig {
            pipeline,
            workload: None,
            observability,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;

        if let Some(workload) = &self.workload {
            workload.validate()?;
        }

        if let Some(observability) = &self.observability {
            if !LOG_LEVELS.contains(&observability.log_level.as_str()) {
                return Err(OrderlineError::config(format!(
                    "Invalid log level: {}",
                    observability.log_level
                )));
            }
        }
        Ok(())
    }

    /// Observability settings, falling back to defaults
    pub fn observability(&self) -> ObservabilityConfig {
        self.observability.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_worker_count_follows_devices() {
        let mut config = PipelineConfig::default();
        assert_eq!(config.worker_count(), 1);
        assert_eq!(config.suggested_depth(), 5);

        config.num_devices = 4;
        assert_eq!(config.worker_count(), 4);
        assert_eq!(config.suggested_depth(), 20);

        config.num_workers = Some(2);
        assert_eq!(config.worker_count(), 2);
    }

    #[test]
    fn test_config_validation() {
        assert!(PipelineConfig::with_workers(3).validate().is_ok());
        assert!(PipelineConfig::with_workers(0).validate().is_err());

        let config = PipelineConfig {
            depth_factor: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            max_pending: Some(0),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_bad_workload() {
        let config = OrderlineConfig {
            workload: Some(WorkloadConfig {
                items: 10,
                min_latency_ms: 40,
                max_latency_ms: 10,
                failure_every: 0,
            }),
            ..OrderlineConfig::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_workload_defaults() {
        let workload = WorkloadConfig::default();
        assert_eq!(workload.items, 100);
        assert_eq!(workload.min_latency_ms, 5);
        assert_eq!(workload.max_latency_ms, 50);
        assert_eq!(workload.failure_every, 0);
        assert!(workload.validate().is_ok());

        // Omitted fields take the same defaults as the Default impl.
        let parsed: WorkloadConfig = serde_yaml::from_str("failure_every: 4").unwrap();
        assert_eq!(parsed.items, workload.items);
        assert_eq!(parsed.max_latency_ms, workload.max_latency_ms);
        assert_eq!(parsed.failure_every, 4);
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "pipeline:\n  num_devices: 2\n  max_pending: 64\nworkload:\n  items: 100\nobservability:\n  log_level: debug"
        )
        .unwrap();

        let config = OrderlineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.pipeline.worker_count(), 2);
        assert_eq!(config.pipeline.depth_factor, 5);
        assert_eq!(config.pipeline.max_pending, Some(64));

        let workload = config.workload.unwrap();
        assert_eq!(workload.items, 100);
        assert_eq!(workload.min_latency_ms, 5);
        assert_eq!(workload.max_latency_ms, 50);
        assert_eq!(config.observability.unwrap().log_level, "debug");
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"pipeline": {{"num_workers": 3, "depth_factor": 2}}}}"#).unwrap();

        let config = OrderlineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.pipeline.worker_count(), 3);
        assert_eq!(config.pipeline.suggested_depth(), 6);
        assert!(config.workload.is_none());
    }

    #[test]
    fn test_from_file_rejects_invalid_level() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(file, "observability:\n  log_level: loud").unwrap();

        let err = OrderlineConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, OrderlineError::Config(_)));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("ORDERLINE_WORKERS", "4"),
            ("ORDERLINE_MAX_PENDING", "32"),
            ("ORDERLINE_LOG_LEVEL", "warn"),
        ]
        .into_iter()
        .collect();

        let config = OrderlineConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.pipeline.worker_count(), 4);
        assert_eq!(config.pipeline.max_pending, Some(32));
        assert_eq!(config.observability().log_level, "warn");
    }

    #[test]
    fn test_from_lookup_invalid_number() {
        let result = OrderlineConfig::from_lookup(|key| {
            (key == "ORDERLINE_WORKERS").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }
}
