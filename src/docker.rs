use crate::process::{self, Failure};
use crate::triggers::TriggersPayload;
use log::debug;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum Error {
    #[error("docker build failed: {0}")]
    Build(Failure),

    #[error("no Dockerfile found in {0}")]
    DockerfileNotFound(String),

    #[error("docker push failed: {0}")]
    Push(Failure),

    #[error("docker run failed: {0}")]
    Inspect(Failure),

    #[error("unreadable function metadata in image output: {0}")]
    InspectOutput(#[from] serde_json::Error),

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

/// Builds, pushes and looks inside container images.
pub trait ImageTool {
    async fn build(&self, image: &str, context_dir: &Path) -> Result<(), Error>;

    async fn push(&self, image: &str) -> Result<(), Error>;

    async fn inspect_triggers(&self, image: &str) -> Result<TriggersPayload, Error>;
}

/// Drives the `docker` command line client.
pub struct Docker {
    pub program: String,
    /// Function app root inside the image.
    pub image_root: String,
    pub host_file: String,
    pub binding_file: String,
}

impl ImageTool for Docker {
    async fn build(&self, image: &str, context_dir: &Path) -> Result<(), Error> {
        if !context_dir.join("Dockerfile").is_file() {
            return Err(Error::DockerfileNotFound(context_dir.display().to_string()));
        }
        debug!("Building image {}", image);
        let mut command = Command::new(&self.program);
        command.arg("build").arg("--tag").arg(image).arg(context_dir);
        process::run(&mut command, true)
            .await?
            .check()
            .map_err(Error::Build)?;
        Ok(())
    }

    async fn push(&self, image: &str) -> Result<(), Error> {
        debug!("Pushing image {}", image);
        let mut command = Command::new(&self.program);
        command.arg("push").arg(image);
        process::run(&mut command, true)
            .await?
            .check()
            .map_err(Error::Push)?;
        Ok(())
    }

    async fn inspect_triggers(&self, image: &str) -> Result<TriggersPayload, Error> {
        let mut command = Command::new(&self.program);
        command
            .arg("run")
            .arg("--rm")
            .arg("--entrypoint")
            .arg("/bin/sh")
            .arg(image)
            .arg("-c")
            .arg(self.inspect_script());
        let completed = process::run(&mut command, false)
            .await?
            .check()
            .map_err(Error::Inspect)?;
        parse_inspection(&completed.stdout)
    }
}

impl Docker {
    /// Shell script printing the host file and every function's binding
    /// file below the function root as one JSON document.
    fn inspect_script(&self) -> String {
        format!(
            r#"cd '{root}' || exit 1
printf '{{"hostJson":'
cat '{host}' || exit 1
printf ',"functionsJson":{{'
sep=''
for dir in */; do
  file="${{dir}}{binding}"
  if [ -f "$file" ]; then
    printf '%s"%s":' "$sep" "${{dir%/}}"
    cat "$file"
    sep=','
  fi
done
printf '}}}}'"#,
            root = self.image_root,
            host = self.host_file,
            binding = self.binding_file,
        )
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Inspection {
    host_json: Value,
    #[serde(default)]
    functions_json: BTreeMap<String, Value>,
}

fn parse_inspection(stdout: &str) -> Result<TriggersPayload, Error> {
    let inspection: Inspection = serde_json::from_str(stdout)?;
    Ok(TriggersPayload::from_documents(
        inspection.host_json,
        inspection.functions_json,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docker() -> Docker {
        Docker {
            program: "docker".into(),
            image_root: "/home/site/wwwroot".into(),
            host_file: "host.json".into(),
            binding_file: "function.json".into(),
        }
    }

    #[test]
    fn parse_image_inspection_output() {
        let stdout = r#"{"hostJson":{"version":"2.0"}
,"functionsJson":{"Http":{"bindings":[{"type":"httpTrigger"}]},"Orphan":{"disabled":true}}}"#;
        let payload = parse_inspection(stdout).unwrap();
        assert_eq!(payload.host_config, json!({"version": "2.0"}));
        assert_eq!(
            payload.function_bindings.keys().collect::<Vec<_>>(),
            vec!["Http"]
        );
    }

    #[test]
    fn garbage_inspection_output_is_an_error() {
        assert!(matches!(
            parse_inspection("sh: cat: not found"),
            Err(Error::InspectOutput(_))
        ));
    }

    #[test]
    fn inspect_script_reads_from_image_root() {
        let script = docker().inspect_script();
        assert!(script.starts_with("cd '/home/site/wwwroot'"));
        assert!(script.contains("cat 'host.json'"));
        assert!(script.contains(r#"file="${dir}function.json""#));
        assert!(script.ends_with("printf '}}'"));
    }

    #[tokio::test]
    async fn build_requires_dockerfile() {
        let dir = tempfile::tempdir().unwrap();
        let err = docker().build("reg.io/fn1", dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::DockerfileNotFound(_)));
    }
}
