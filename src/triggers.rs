//! Trigger and binding metadata discovery.
//!
//! Metadata comes from one of two places: the function directories of a
//! local project, or the file system of an already built image. Both produce
//! the same [`TriggersPayload`].

use crate::docker::{self, ImageTool};
use crate::project::{self, Project, ProjectBuilder};
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid trigger metadata in {path}: {reason}")]
    InvalidTriggerMetadata { path: String, reason: String },

    #[error("inspect image: {0}")]
    ImageInspectionFailed(#[from] docker::Error),

    #[error("{0}")]
    ProjectBuild(#[from] project::Error),

    #[error("scan {path}: {err}")]
    Scan { err: std::io::Error, path: String },
}

/// Host configuration and per-function binding documents of a workload.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggersPayload {
    pub host_config: Value,
    /// Keyed by function name.
    pub function_bindings: BTreeMap<String, Value>,
}

impl TriggersPayload {
    /// Keeps only the function documents that declare bindings.
    /// A later document with the same name replaces an earlier one.
    pub fn from_documents<F>(host_config: Value, functions: F) -> Self
    where
        F: IntoIterator<Item = (String, Value)>,
    {
        let function_bindings = functions
            .into_iter()
            .filter(|(name, document)| {
                let keep = has_bindings(document);
                if !keep {
                    debug!("Function {name} declares no bindings, skipping");
                }
                keep
            })
            .collect();
        Self {
            host_config,
            function_bindings,
        }
    }
}

fn has_bindings(document: &Value) -> bool {
    document.get("bindings").is_some_and(|bindings| !bindings.is_null())
}

/// Where trigger metadata is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    LocalSource,
    BuiltImage,
}

impl Strategy {
    /// A dry run never builds, so an image that would have to be built
    /// cannot be inspected and the local project is read instead.
    pub fn select(dry_run: bool, requires_build: bool, no_docker: bool) -> Self {
        if no_docker || (dry_run && requires_build) {
            Strategy::LocalSource
        } else {
            Strategy::BuiltImage
        }
    }
}

/// Reads function metadata from a project directory, compiling it first
/// when the worker runtime needs that. Function directories are scanned in
/// the build output; the host file always comes from the project directory.
pub struct LocalSourceDiscovery<'a, P> {
    pub project: &'a Project,
    pub builder: &'a P,
}

impl<P: ProjectBuilder> LocalSourceDiscovery<'_, P> {
    pub async fn discover(&self) -> Result<TriggersPayload, Error> {
        let root = if self.project.runtime.requires_compile() {
            let output_dir = self.project.build_output_dir();
            info!(
                "Building {:?} project into {}",
                self.project.runtime,
                output_dir.display()
            );
            self.builder.build(&self.project.dir, &output_dir).await?;
            output_dir
        } else {
            self.project.dir.clone()
        };

        let layout = &self.project.layout;
        let functions = read_function_documents(&root, &layout.binding_file)?;
        let host_config = read_json(&self.project.dir.join(&layout.host_file))?;
        Ok(TriggersPayload::from_documents(host_config, functions))
    }
}

/// Reads function metadata out of an image.
pub struct BuiltImageDiscovery<'a, I> {
    pub images: &'a I,
    pub image: &'a str,
}

impl<I: ImageTool> BuiltImageDiscovery<'_, I> {
    pub async fn discover(&self) -> Result<TriggersPayload, Error> {
        info!("Reading trigger metadata from image {}", self.image);
        Ok(self.images.inspect_triggers(self.image).await?)
    }
}

/// Binding documents of every immediate subdirectory of `root` that has one,
/// in directory name order.
fn read_function_documents(root: &Path, binding_file: &str) -> Result<Vec<(String, Value)>, Error> {
    let scan_error = |err| Error::Scan {
        err,
        path: root.display().to_string(),
    };
    let mut dirs = std::fs::read_dir(root)
        .map_err(scan_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(scan_error)?;
    dirs.sort_by_key(|entry| entry.file_name());

    let mut documents = Vec::new();
    for entry in dirs {
        let binding_path = entry.path().join(binding_file);
        if !entry.path().is_dir() || !binding_path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        debug!("Found function {name} at {}", binding_path.display());
        documents.push((name, read_json(&binding_path)?));
    }
    if documents.is_empty() {
        warn!("No {binding_file} files found below {}", root.display());
    }
    Ok(documents)
}

fn read_json(path: &Path) -> Result<Value, Error> {
    let invalid = |reason: String| Error::InvalidTriggerMetadata {
        path: path.display().to_string(),
        reason,
    };
    let content = std::fs::read_to_string(path).map_err(|err| invalid(err.to_string()))?;
    serde_json::from_str(&content).map_err(|err| invalid(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::project::WorkerRuntime;
    use serde_json::json;
    use std::cell::RefCell;
    use std::path::PathBuf;

    fn write(path: PathBuf, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn project(dir: &Path, runtime: WorkerRuntime) -> Project {
        Project {
            dir: dir.to_path_buf(),
            runtime,
            layout: config::File::default().project,
        }
    }

    /// Lays out a compiled function app in the output directory.
    #[derive(Default)]
    struct FakeBuilder {
        builds: RefCell<Vec<(PathBuf, PathBuf)>>,
    }

    impl ProjectBuilder for FakeBuilder {
        async fn build(&self, project_dir: &Path, output_dir: &Path) -> Result<(), project::Error> {
            self.builds
                .borrow_mut()
                .push((project_dir.to_path_buf(), output_dir.to_path_buf()));
            write(
                output_dir.join("Compiled/function.json"),
                r#"{"bindings": [{"type": "queueTrigger", "name": "msg"}]}"#,
            );
            Ok(())
        }
    }

    #[test]
    fn select_strategy() {
        assert_eq!(Strategy::select(true, true, false), Strategy::LocalSource);
        assert_eq!(Strategy::select(true, false, false), Strategy::BuiltImage);
        assert_eq!(Strategy::select(false, true, false), Strategy::BuiltImage);
        assert_eq!(Strategy::select(false, false, false), Strategy::BuiltImage);
        assert_eq!(Strategy::select(false, false, true), Strategy::LocalSource);
        assert_eq!(Strategy::select(true, false, true), Strategy::LocalSource);
    }

    #[test]
    fn payload_keeps_only_functions_with_bindings() {
        let payload = TriggersPayload::from_documents(
            json!({}),
            vec![
                ("a".to_string(), json!({"bindings": []})),
                ("b".to_string(), json!({"bindings": null})),
                ("c".to_string(), json!({"scriptFile": "run.py"})),
            ],
        );
        assert_eq!(payload.function_bindings.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[tokio::test]
    async fn discover_from_project_directory() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path().join("host.json"), r#"{"version": "2.0"}"#);
        write(
            dir.path().join("QueueFn/function.json"),
            r#"{"bindings": [{"type": "queueTrigger", "name": "msg", "queueName": "items"}]}"#,
        );
        write(dir.path().join("Disabled/function.json"), r#"{"bindings": null}"#);
        write(dir.path().join("node_modules/package.json"), "{}");
        write(dir.path().join("function.json"), "not a function directory");

        let builder = FakeBuilder::default();
        let project = project(dir.path(), WorkerRuntime::Node);
        let payload = LocalSourceDiscovery {
            project: &project,
            builder: &builder,
        }
        .discover()
        .await
        .unwrap();

        assert!(builder.builds.borrow().is_empty());
        assert_eq!(payload.host_config, json!({"version": "2.0"}));
        assert_eq!(payload.function_bindings.len(), 1);
        assert_eq!(
            payload.function_bindings["QueueFn"]["bindings"][0]["queueName"],
            "items"
        );
    }

    #[tokio::test]
    async fn compiled_runtime_is_built_and_output_scanned() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path().join("host.json"), r#"{"version": "2.0"}"#);
        write(
            dir.path().join("Source/function.json"),
            r#"{"bindings": [{"type": "httpTrigger", "name": "req"}]}"#,
        );

        let builder = FakeBuilder::default();
        let project = project(dir.path(), WorkerRuntime::Dotnet);
        let payload = LocalSourceDiscovery {
            project: &project,
            builder: &builder,
        }
        .discover()
        .await
        .unwrap();

        assert_eq!(
            *builder.builds.borrow(),
            vec![(dir.path().to_path_buf(), dir.path().join("bin/output"))]
        );
        assert_eq!(payload.host_config, json!({"version": "2.0"}));
        assert_eq!(
            payload.function_bindings.keys().collect::<Vec<_>>(),
            vec!["Compiled"]
        );
    }

    #[tokio::test]
    async fn compiled_runtime_reads_host_file_from_project_directory() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path().join("host.json"), r#"{"version": "2.0", "logging": {}}"#);

        let builder = FakeBuilder::default();
        let project = project(dir.path(), WorkerRuntime::DotnetIsolated);
        let payload = LocalSourceDiscovery {
            project: &project,
            builder: &builder,
        }
        .discover()
        .await
        .unwrap();

        assert!(!dir.path().join("bin/output/host.json").exists());
        assert_eq!(payload.host_config, json!({"version": "2.0", "logging": {}}));
        assert_eq!(
            payload.function_bindings.keys().collect::<Vec<_>>(),
            vec!["Compiled"]
        );
    }

    #[tokio::test]
    async fn missing_host_file_is_invalid_metadata() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path().join("Fn/function.json"), r#"{"bindings": []}"#);

        let project = project(dir.path(), WorkerRuntime::Python);
        let err = LocalSourceDiscovery {
            project: &project,
            builder: &FakeBuilder::default(),
        }
        .discover()
        .await
        .unwrap_err();

        match err {
            Error::InvalidTriggerMetadata { path, .. } => assert!(path.ends_with("host.json")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn malformed_binding_file_is_invalid_metadata() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path().join("host.json"), "{}");
        write(dir.path().join("Broken/function.json"), r#"{"bindings": ["#);

        let project = project(dir.path(), WorkerRuntime::Node);
        let err = LocalSourceDiscovery {
            project: &project,
            builder: &FakeBuilder::default(),
        }
        .discover()
        .await
        .unwrap_err();

        match err {
            Error::InvalidTriggerMetadata { path, .. } => {
                assert!(path.ends_with("function.json"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
