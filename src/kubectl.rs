use crate::process::{self, Failure};
use log::debug;
use serde_json::Value;
use std::io::Write;
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum Error {
    #[error("kubectl get namespace failed: {0}")]
    GetNamespace(Failure),

    #[error("kubectl create namespace failed: {0}")]
    CreateNamespace(Failure),

    #[error("kubectl apply failed: {0}")]
    Apply(Failure),

    #[error("serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

/// Mutates the target cluster.
pub trait ClusterTool {
    async fn namespace_exists(&self, name: &str) -> Result<bool, Error>;

    async fn create_namespace(&self, name: &str) -> Result<(), Error>;

    /// Create or update a single object. Returns once the cluster accepted it.
    async fn apply(&self, manifest: &Value, namespace: &str, show_output: bool) -> Result<(), Error>;
}

/// Drives the `kubectl` command line client with the ambient kubeconfig.
pub struct Kubectl {
    pub program: String,
}

impl ClusterTool for Kubectl {
    async fn namespace_exists(&self, name: &str) -> Result<bool, Error> {
        let mut command = Command::new(&self.program);
        command.arg("get").arg("namespace").arg(name);
        let completed = process::run(&mut command, false).await?;
        if completed.success() {
            Ok(true)
        } else if is_not_found(&completed.stderr) {
            Ok(false)
        } else {
            Err(Error::GetNamespace(completed.into_failure()))
        }
    }

    async fn create_namespace(&self, name: &str) -> Result<(), Error> {
        let mut command = Command::new(&self.program);
        command.arg("create").arg("namespace").arg(name);
        process::run(&mut command, false)
            .await?
            .check()
            .map_err(Error::CreateNamespace)?;
        Ok(())
    }

    async fn apply(&self, manifest: &Value, namespace: &str, show_output: bool) -> Result<(), Error> {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile()?;
        file.write_all(serde_json::to_string(manifest)?.as_bytes())?;
        file.flush()?;
        debug!("Wrote manifest to {}", file.path().display());

        let mut command = Command::new(&self.program);
        command
            .arg("apply")
            .arg("--namespace")
            .arg(namespace)
            .arg("--filename")
            .arg(file.path());
        process::run(&mut command, show_output)
            .await?
            .check()
            .map_err(Error::Apply)?;
        Ok(())
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("(NotFound)")
}

#[cfg(test)]
mod tests {
    use super::is_not_found;

    #[test]
    fn missing_namespace_is_recognized() {
        assert!(is_not_found(
            "Error from server (NotFound): namespaces \"functions\" not found\n"
        ));
        assert!(!is_not_found(
            "The connection to the server localhost:8080 was refused - did you specify the right host or port?"
        ));
    }

    #[test]
    fn client_side_not_found_is_not_a_missing_namespace() {
        assert!(!is_not_found("error: context \"prod\" not found\n"));
        assert!(!is_not_found("error: no configuration has been provided, kubeconfig not found"));
    }
}
