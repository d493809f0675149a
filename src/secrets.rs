use log::warn;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("read {path}: {err}")]
    ReadFile {
        err: std::io::Error,
        path: String,
    },

    #[error("parse {path}: {err}")]
    Parse {
        err: serde_json::Error,
        path: String,
    },
}

/// Supplies the application settings a workload runs with.
pub trait SecretsProvider {
    fn secrets(&self) -> Result<BTreeMap<String, String>, Error>;
}

/// Settings from the `Values` section of a local settings file.
pub struct LocalSettings {
    pub path: PathBuf,
}

#[derive(Deserialize)]
struct SettingsFile {
    #[serde(rename = "Values", default)]
    values: BTreeMap<String, Value>,
}

impl SecretsProvider for LocalSettings {
    fn secrets(&self) -> Result<BTreeMap<String, String>, Error> {
        let path = self.path.display().to_string();
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!("{path} not found, deploying without application settings");
                return Ok(BTreeMap::new());
            }
            Err(err) => return Err(Error::ReadFile { err, path }),
        };
        let settings: SettingsFile =
            serde_json::from_str(&content).map_err(|err| Error::Parse { err, path })?;

        Ok(settings
            .values
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect())
    }
}
