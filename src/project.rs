use crate::config;
use crate::process;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

/// Settings key naming the language worker of a function project.
pub const WORKER_RUNTIME_SETTING: &str = "FUNCTIONS_WORKER_RUNTIME";

#[derive(Error, Debug)]
pub enum Error {
    #[error("project build failed: {0}")]
    Build(process::Failure),

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

/// Language worker the functions are written for.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerRuntime {
    Dotnet,
    DotnetIsolated,
    Node,
    Python,
    Java,
    Powershell,
    Custom,
    Other(String),
    /// No runtime setting found.
    Unknown,
}

impl WorkerRuntime {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "dotnet" => WorkerRuntime::Dotnet,
            "dotnet-isolated" => WorkerRuntime::DotnetIsolated,
            "node" => WorkerRuntime::Node,
            "python" => WorkerRuntime::Python,
            "java" => WorkerRuntime::Java,
            "powershell" => WorkerRuntime::Powershell,
            "custom" => WorkerRuntime::Custom,
            "" => WorkerRuntime::Unknown,
            other => WorkerRuntime::Other(other.to_string()),
        }
    }

    pub fn detect(settings: &BTreeMap<String, String>) -> Self {
        settings
            .get(WORKER_RUNTIME_SETTING)
            .map(|value| Self::parse(value))
            .unwrap_or(WorkerRuntime::Unknown)
    }

    /// Whether function metadata only exists after compiling the project.
    pub fn requires_compile(&self) -> bool {
        matches!(self, WorkerRuntime::Dotnet | WorkerRuntime::DotnetIsolated)
    }
}

/// A function project on the local file system.
#[derive(Debug, Clone)]
pub struct Project {
    pub dir: PathBuf,
    pub runtime: WorkerRuntime,
    pub layout: config::Project,
}

impl Project {
    /// Where a compiling runtime writes its build output.
    pub fn build_output_dir(&self) -> PathBuf {
        self.dir.join(&self.layout.build_output)
    }
}

/// Compiles a function project so its function metadata can be read from disk.
pub trait ProjectBuilder {
    async fn build(&self, project_dir: &Path, output_dir: &Path) -> Result<(), Error>;
}

pub struct Dotnet {
    pub program: String,
}

impl ProjectBuilder for Dotnet {
    async fn build(&self, project_dir: &Path, output_dir: &Path) -> Result<(), Error> {
        let mut command = Command::new(&self.program);
        command
            .arg("build")
            .arg("--output")
            .arg(output_dir)
            .current_dir(project_dir);
        process::run(&mut command, true)
            .await?
            .check()
            .map_err(Error::Build)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_runtime_from_settings() {
        let mut settings = BTreeMap::new();
        assert_eq!(WorkerRuntime::detect(&settings), WorkerRuntime::Unknown);

        settings.insert(WORKER_RUNTIME_SETTING.to_string(), "DotNet".to_string());
        assert_eq!(WorkerRuntime::detect(&settings), WorkerRuntime::Dotnet);

        settings.insert(WORKER_RUNTIME_SETTING.to_string(), "rust".to_string());
        assert_eq!(
            WorkerRuntime::detect(&settings),
            WorkerRuntime::Other("rust".into())
        );
    }

    #[test]
    fn only_dotnet_requires_compile() {
        assert!(WorkerRuntime::Dotnet.requires_compile());
        assert!(WorkerRuntime::DotnetIsolated.requires_compile());
        assert!(!WorkerRuntime::Node.requires_compile());
        assert!(!WorkerRuntime::Python.requires_compile());
        assert!(!WorkerRuntime::Unknown.requires_compile());
    }
}
