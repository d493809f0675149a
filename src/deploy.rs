//! The deployment workflow.
//!
//! A live run resolves the image, builds it when a registry was given,
//! reads trigger metadata out of the image, generates manifests, makes sure
//! the namespace exists, pushes the image and applies every manifest in
//! order. A dry run stops after generating and prints the manifests instead.
//!
//! Nothing is rolled back. If applying the k-th manifest fails, the ones
//! before it stay in the cluster and are listed in the error.

use crate::docker::{self, ImageTool};
use crate::image::{self, ResolvedImage};
use crate::kubectl::{self, ClusterTool};
use crate::manifest::{self, ManifestGenerator, ManifestSet, OutputFormat, WorkloadSpec};
use crate::project::{Project, ProjectBuilder};
use crate::request::DeploymentRequest;
use crate::secrets::{self, SecretsProvider};
use crate::triggers::{self, BuiltImageDiscovery, LocalSourceDiscovery, Strategy};
use log::{debug, info};
use std::fmt::{Display, Formatter};
use std::io::Write;
use thiserror::Error;

/// The step of the workflow a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Discover,
    Build,
    Push,
    Assemble,
    Namespace,
    Apply,
    Emit,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::Resolve => "resolve",
            Stage::Discover => "discover",
            Stage::Build => "build",
            Stage::Push => "push",
            Stage::Assemble => "assemble",
            Stage::Namespace => "namespace",
            Stage::Apply => "apply",
            Stage::Emit => "emit",
        })
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("resolve image: {0}")]
    Resolve(#[from] image::Error),

    #[error("discover triggers: {0}")]
    Discover(#[from] triggers::Error),

    #[error("build image: {0}")]
    Build(docker::Error),

    #[error("push image: {0}")]
    Push(docker::Error),

    #[error("read application settings: {0}")]
    Assemble(#[from] secrets::Error),

    #[error("ensure namespace {namespace}: {err}")]
    Namespace {
        namespace: String,
        err: kubectl::Error,
    },

    #[error("apply {manifest} ({position} of {total}): {err}{}", applied_note(.applied))]
    Apply {
        manifest: String,
        position: usize,
        total: usize,
        /// Manifests that were applied before the failure and remain in the cluster.
        applied: Vec<String>,
        err: kubectl::Error,
    },

    #[error("serialize manifests: {0}")]
    Emit(#[from] manifest::Error),

    #[error("write manifests: {0}")]
    Output(std::io::Error),
}

fn applied_note(applied: &[String]) -> String {
    if applied.is_empty() {
        String::new()
    } else {
        format!("; left applied: {}", applied.join(", "))
    }
}

impl Error {
    pub fn stage(&self) -> Stage {
        match self {
            Error::Resolve(_) => Stage::Resolve,
            Error::Discover(_) => Stage::Discover,
            Error::Build(_) => Stage::Build,
            Error::Push(_) => Stage::Push,
            Error::Assemble(_) => Stage::Assemble,
            Error::Namespace { .. } => Stage::Namespace,
            Error::Apply { .. } => Stage::Apply,
            Error::Emit(_) | Error::Output(_) => Stage::Emit,
        }
    }
}

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Previewed { manifests: usize },
    Applied { manifests: usize },
}

/// Runs deployments against a set of collaborators.
pub struct Deployer<I, C, P, G, S> {
    pub images: I,
    pub cluster: C,
    pub builder: P,
    pub generator: G,
    pub secrets: S,
    pub project: Project,
    pub format: OutputFormat,
}

impl<I, C, P, G, S> Deployer<I, C, P, G, S>
where
    I: ImageTool,
    C: ClusterTool,
    P: ProjectBuilder,
    G: ManifestGenerator,
    S: SecretsProvider,
{
    /// Run one deployment. Dry-run output is written to `out`.
    pub async fn deploy<W: Write>(
        &self,
        request: &DeploymentRequest,
        out: &mut W,
    ) -> Result<Outcome, Error> {
        let image = image::resolve(request)?;
        info!(
            "Deploying {} with image {}{}",
            request.name,
            image.reference,
            if image.requires_build { " (build required)" } else { "" }
        );

        let build = image.requires_build && !request.dry_run;
        if build {
            info!("Building image {}", image.reference);
            self.images
                .build(&image.reference, &self.project.dir)
                .await
                .map_err(Error::Build)?;
        }

        let strategy = Strategy::select(request.dry_run, image.requires_build, request.no_docker);
        debug!("Trigger discovery strategy: {:?}", strategy);
        let triggers = match strategy {
            Strategy::LocalSource => {
                LocalSourceDiscovery {
                    project: &self.project,
                    builder: &self.builder,
                }
                .discover()
                .await?
            }
            Strategy::BuiltImage => {
                BuiltImageDiscovery {
                    images: &self.images,
                    image: &image.reference,
                }
                .discover()
                .await?
            }
        };
        info!("Found {} function(s)", triggers.function_bindings.len());

        let secrets = self.secrets.secrets()?;
        let manifests = self.generator.generate(&WorkloadSpec {
            name: &request.name,
            image: &image.reference,
            namespace: &request.namespace,
            triggers: &triggers,
            secrets: &secrets,
            pull_secret: request.pull_secret.as_deref(),
            secrets_collection_name: request.secrets_collection_name.as_deref(),
            config_map_name: request.config_map_name.as_deref(),
            use_config_map: request.use_config_map,
            polling_interval: request.polling_interval,
            cooldown_period: request.cooldown_period,
        });

        if request.dry_run {
            let text = manifest::serialize(&manifests, self.format)?;
            out.write_all(text.as_bytes()).map_err(Error::Output)?;
            out.flush().map_err(Error::Output)?;
            return Ok(Outcome::Previewed {
                manifests: manifests.len(),
            });
        }

        ensure_namespace(&self.cluster, &request.namespace).await?;
        if build {
            self.push(&image).await?;
        }
        apply_all(&self.cluster, &manifests, &request.namespace, request.show_output).await?;
        Ok(Outcome::Applied {
            manifests: manifests.len(),
        })
    }

    async fn push(&self, image: &ResolvedImage) -> Result<(), Error> {
        info!("Pushing image {}", image.reference);
        self.images
            .push(&image.reference)
            .await
            .map_err(Error::Push)
    }
}

/// Create the namespace unless it already exists.
pub async fn ensure_namespace<C: ClusterTool>(cluster: &C, name: &str) -> Result<(), Error> {
    let namespace_error = |err| Error::Namespace {
        namespace: name.to_string(),
        err,
    };
    if cluster.namespace_exists(name).await.map_err(namespace_error)? {
        debug!("Namespace {name} exists");
        return Ok(());
    }
    info!("Creating namespace {name}");
    cluster.create_namespace(name).await.map_err(namespace_error)
}

/// Apply manifests one at a time, stopping at the first failure.
pub async fn apply_all<C: ClusterTool>(
    cluster: &C,
    manifests: &ManifestSet,
    namespace: &str,
    show_output: bool,
) -> Result<(), Error> {
    let total = manifests.len();
    for (index, object) in manifests.iter().enumerate() {
        let description = manifest::describe(object);
        info!("Applying {description} ({} of {total})", index + 1);
        if let Err(err) = cluster.apply(object, namespace, show_output).await {
            return Err(Error::Apply {
                manifest: description,
                position: index + 1,
                total,
                applied: manifests[..index].iter().map(manifest::describe).collect(),
                err,
            });
        }
    }
    Ok(())
}
