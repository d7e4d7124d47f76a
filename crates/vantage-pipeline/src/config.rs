//! Static pipeline configuration.
//!
//! A single mapping from node instance to property set, loaded once at
//! startup from an optional TOML file and applied during assembly. There is
//! no runtime reconfiguration surface.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub inference: InferenceConfig,
    pub tracker: TrackerConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
}

impl PipelineConfig {
    /// Load from a TOML file, or fall back to the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigFileError> {
        match path {
            None => Ok(Self::default()),
            Some(path) => {
                let raw = fs::read_to_string(path)?;
                Ok(toml::from_str(&raw)?)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub file: FileSourceConfig,
    pub sensor: SensorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileSourceConfig {
    pub location: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl Default for FileSourceConfig {
    fn default() -> Self {
        Self {
            location: PathBuf::from("samples/highway-1080p.vcf"),
            width: 1920,
            height: 1080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SensorConfig {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub sensor_id: u32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            framerate: 60,
            sensor_id: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceConfig {
    pub primary: PrimaryInferConfig,
    pub secondary: SecondaryInferConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrimaryInferConfig {
    pub config_path: String,
    pub unique_id: u32,
}

impl Default for PrimaryInferConfig {
    fn default() -> Self {
        Self {
            config_path: "models/detector-primary.toml".to_string(),
            unique_id: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecondaryInferConfig {
    pub config_path: String,
    pub unique_id: u32,
    /// Primary engine whose detections this stage classifies.
    pub infer_on_id: u32,
    /// Class-id filter in the engine's `0:1:2` notation.
    pub infer_on_class_ids: String,
    pub batch_size: u32,
}

impl Default for SecondaryInferConfig {
    fn default() -> Self {
        Self {
            config_path: "models/vehicle-type.toml".to_string(),
            unique_id: 2,
            infer_on_id: 1,
            infer_on_class_ids: "0:".to_string(),
            batch_size: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 368,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    pub payload_type: u8,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "192.168.100.117".to_string(),
            port: 8001,
            payload_type: 96,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub location: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            location: PathBuf::from("capture.vcf"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_mirror_the_reference_deployment() {
        let config = PipelineConfig::default();
        assert_eq!(config.source.sensor.width, 1280);
        assert_eq!(config.source.sensor.height, 720);
        assert_eq!(config.source.file.width, 1920);
        assert_eq!(config.network.port, 8001);
        assert_eq!(config.network.payload_type, 96);
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let parsed: PipelineConfig = toml::from_str(
            r#"
            [network]
            host = "10.0.0.9"
            port = 9000
            payload_type = 96

            [source.sensor]
            framerate = 30
            "#,
        )
        .unwrap();
        assert_eq!(parsed.network.host, "10.0.0.9");
        assert_eq!(parsed.network.port, 9000);
        assert_eq!(parsed.source.sensor.framerate, 30);
        // Untouched sections keep their defaults.
        assert_eq!(parsed.source.sensor.width, 1280);
        assert_eq!(parsed.tracker.width, 640);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed = toml::from_str::<PipelineConfig>("[network]\nhostname = \"x\"\n");
        assert!(parsed.is_err());
    }
}
