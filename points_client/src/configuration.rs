use std::time::Duration;

use secrecy::Secret;
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;

use crate::domain::entities::collection::Distance;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub qdrant: QdrantSettings,
    pub collection: CollectionSettings,
    pub upload: UploadSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QdrantSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    /// Only needed when the server enforces an api key
    pub api_key: Option<Secret<String>>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_ms: u64,
}

impl QdrantSettings {
    pub fn get_http_base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectionSettings {
    pub name: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub vector_size: u64,
    pub distance: Distance,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub batch_size: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub parallelism: usize,
    /// Makes the server apply each batch before answering
    pub wait: bool,
}

/// Extracts the client settings from configuration files and env variables
///
/// `base.yaml` contains the settings shared by all environments.
/// A file per environment overrides them: `local.yaml` and `production.yaml`.
/// The environment is set with the env var `APP_ENVIRONMENT`, `local` if not set.
///
/// Settings are also taken from environment variables: with a prefix of APP and '__' as separator.
/// For ex: `APP_UPLOAD__PARALLELISM=4` would set `Settings.upload.parallelism`
pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("No current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;
    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(environment_filename),
        ))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}

/// The possible runtime environment for the client.
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
