use serde::Deserialize;
use serde_inline_default::serde_inline_default;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_CONFIG: &str = include_str!("../default.toml");

#[derive(Error, Debug)]
pub enum Error {
    #[error("read {path}: {err}")]
    ReadFile {
        err: std::io::Error,
        path: String,
    },

    #[error("parse {path}: {err}")]
    Parse {
        err: toml::de::Error,
        path: String,
    },
}

/// A funcdeploy.toml file.
#[derive(Deserialize, Debug)]
pub struct File {
    pub description: Option<String>,
    pub deploy: Deploy,
    pub tools: Tools,
    pub project: Project,
}

impl Default for File {
    fn default() -> Self {
        // The default config is compiled into the program, so
        // make sure to test default() to catch panics compile-time.
        toml::from_str(DEFAULT_CONFIG).unwrap()
    }
}

impl File {
    /// Load a user configuration file and lay it over the built-in defaults.
    /// Keys missing from the user file keep their default value.
    pub fn default_with_user_config_file(path: &str) -> Result<Self, Error> {
        let user_config = std::fs::read_to_string(path).map_err(|err| Error::ReadFile {
            err,
            path: path.to_string(),
        })?;
        Self::merged(&user_config).map_err(|err| Error::Parse {
            err,
            path: path.to_string(),
        })
    }

    fn merged(user_config: &str) -> Result<Self, toml::de::Error> {
        let mut base: toml::Table = toml::from_str(DEFAULT_CONFIG)?;
        let overlay: toml::Table = toml::from_str(user_config)?;
        merge(&mut base, overlay);
        toml::Value::Table(base).try_into()
    }
}

fn merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(overlay_table) => match base.get_mut(&key) {
                Some(toml::Value::Table(base_table)) => merge(base_table, overlay_table),
                _ => {
                    base.insert(key, toml::Value::Table(overlay_table));
                }
            },
            value => {
                base.insert(key, value);
            }
        }
    }
}

#[serde_inline_default]
#[derive(Deserialize, Debug)]
pub struct Deploy {
    #[serde_inline_default("default".to_string())]
    pub namespace: String,
    #[serde_inline_default(30)]
    pub polling_interval: u32,
    #[serde_inline_default(300)]
    pub cooldown_period: u32,
}

#[serde_inline_default]
#[derive(Deserialize, Debug)]
pub struct Tools {
    #[serde_inline_default("docker".to_string())]
    pub docker: String,
    #[serde_inline_default("kubectl".to_string())]
    pub kubectl: String,
    #[serde_inline_default("dotnet".to_string())]
    pub dotnet: String,
}

/// File layout of a function project, both on disk and inside a built image.
#[derive(Deserialize, Debug, Clone)]
pub struct Project {
    pub host_file: String,
    pub binding_file: String,
    pub settings_file: String,
    pub build_output: PathBuf,
    pub image_root: String,
}
