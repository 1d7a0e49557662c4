use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub model: ModelConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub trait Validatable {
    fn get_path(&self) -> PathBuf;
    fn validate(&self) -> Result<(), String>;
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub onnx_file: String,
    pub labels_file: String,
    pub model_dir: PathBuf,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default, deserialize_with = "deserialize_device")]
    pub device: DevicePreference,
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn deserialize_device<'de, D>(deserializer: D) -> Result<DevicePreference, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

impl ModelConfig {
    pub fn get_labels_path(&self) -> PathBuf {
        self.model_dir.join(&self.labels_file)
    }
}

impl Validatable for ModelConfig {
    fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }

    fn validate(&self) -> Result<(), String> {
        if !self.get_path().exists() {
            return Err(format!("Model file not found: {:?}", self.get_path()));
        }
        if !self.get_labels_path().exists() {
            return Err(format!(
                "Labels file not found: {:?}",
                self.get_labels_path()
            ));
        }
        if self.num_instances == 0 {
            return Err("num_instances must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Where inference runs. `Auto` prefers CUDA and falls back to the CPU.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl DevicePreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            DevicePreference::Auto => "auto",
            DevicePreference::Cpu => "cpu",
            DevicePreference::Cuda => "cuda",
        }
    }
}

impl TryFrom<String> for DevicePreference {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            other => Err(format!(
                "{} is not a supported device. Use either `auto`, `cpu` or `cuda`.",
                other
            )),
        }
    }
}

pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no working directory: {}", e)))?;

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    load_configuration(&base_path.join("configuration"), environment)
}

/// Layers `base.yaml`, the optional environment file and `APP_*` variables.
/// Runs before logging is set up, so failures are only returned.
pub fn load_configuration(
    configuration_directory: &Path,
    environment: Environment,
) -> Result<Config, config::ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config = settings.try_deserialize::<Config>()?;
    config
        .model
        .validate()
        .map_err(config::ConfigError::Message)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn model_config(dir: &std::path::Path) -> ModelConfig {
        ModelConfig {
            onnx_file: "yolo.onnx".to_string(),
            labels_file: "labels.txt".to_string(),
            model_dir: dir.to_path_buf(),
            num_instances: 1,
            device: DevicePreference::Auto,
        }
    }

    #[test]
    fn test_validate_requires_weights_and_labels() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = model_config(dir.path());

        let err = cfg.validate().unwrap_err();
        assert!(err.contains("Model file not found"), "{err}");

        fs::write(dir.path().join("yolo.onnx"), b"weights").unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("Labels file not found"), "{err}");

        fs::write(dir.path().join("labels.txt"), b"apple\n").unwrap();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_instances() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("yolo.onnx"), b"weights").unwrap();
        fs::write(dir.path().join("labels.txt"), b"apple\n").unwrap();
        let mut cfg = model_config(dir.path());
        cfg.num_instances = 0;

        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_configuration_reports_missing_weights() {
        let dir = tempfile::tempdir().unwrap();
        let models = dir.path().join("models");
        fs::create_dir(&models).unwrap();
        fs::write(models.join("labels.txt"), b"apple\n").unwrap();
        let yaml = format!(
            r#"
log_level: info
server:
  host: 127.0.0.1
  port: 8000
model:
  model_dir: {}
  onnx_file: yolo.onnx
  labels_file: labels.txt
"#,
            models.display()
        );
        fs::write(dir.path().join("base.yaml"), yaml).unwrap();

        let err = load_configuration(dir.path(), Environment::Local).unwrap_err();
        assert!(err.to_string().contains("Model file not found"), "{err}");

        fs::write(models.join("yolo.onnx"), b"weights").unwrap();
        let config = load_configuration(dir.path(), Environment::Local).unwrap();
        assert_eq!(config.server.get_address(), "127.0.0.1:8000");
    }

    #[test]
    fn test_parse_device_preference() {
        assert_eq!(
            DevicePreference::try_from("CUDA".to_string()).unwrap(),
            DevicePreference::Cuda
        );
        assert_eq!(
            DevicePreference::try_from("cpu".to_string()).unwrap(),
            DevicePreference::Cpu
        );
        assert!(DevicePreference::try_from("tpu".to_string()).is_err());
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let yaml = r#"
log_level: debug
server:
  host: 127.0.0.1
  port: 8000
model:
  model_dir: models
  onnx_file: yolo.onnx
  labels_file: labels.txt
  num_instances: 2
  device: cpu
"#;
        let settings = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap();
        let config: Config = settings.try_deserialize().unwrap();

        assert_eq!(config.server.get_address(), "127.0.0.1:8000");
        assert_eq!(config.server.max_upload_bytes, 20 * 1024 * 1024);
        assert_eq!(config.model.num_instances, 2);
        assert_eq!(config.model.device, DevicePreference::Cpu);
        assert_eq!(config.log_level.as_str(), "debug");
        assert_eq!(
            config.model.get_path(),
            PathBuf::from("models").join("yolo.onnx")
        );
    }
}
