//! Function workload deployer

use crate::deploy::{Deployer, Outcome};
use crate::manifest::OutputFormat;
use crate::project::{Project, WorkerRuntime};
use crate::request::DeploymentRequest;
use crate::secrets::{LocalSettings, SecretsProvider};
use clap::Parser;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use thiserror::Error;

mod config;
mod deploy;
mod docker;
mod image;
mod kubectl;
mod manifest;
mod process;
mod project;
mod request;
mod secrets;
mod triggers;

/// Deploy a function app to Kubernetes, scaled by KEDA.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Root of the function project.
    #[arg(default_value = ".")]
    source_directory: String,

    /// Path to the configuration file.
    #[arg(long)]
    config: Option<String>,

    /// Name of the deployment; all generated objects are named after it.
    #[arg(long, value_parser = non_empty)]
    name: String,

    /// Image to deploy as-is, without building.
    #[arg(long)]
    image_name: Option<String>,

    /// Registry to build and push `<registry>/<name>` to.
    #[arg(long)]
    registry: Option<String>,

    /// Kubernetes namespace to deploy to.
    #[arg(long)]
    namespace: Option<String>,

    /// Secret holding credentials for pulling the image.
    #[arg(long)]
    pull_secret: Option<String>,

    /// Seconds between KEDA checks of each trigger source.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    polling_interval: Option<u32>,

    /// Seconds KEDA waits after the last active trigger before scaling to zero.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    cooldown_period: Option<u32>,

    /// Use an existing Secret for application settings instead of generating one.
    #[arg(long = "secrets-name")]
    secrets_name: Option<String>,

    /// Use an existing ConfigMap for application settings instead of generating one.
    #[arg(long)]
    config_map_name: Option<String>,

    /// Read functions from the source directory instead of from the image.
    #[arg(long)]
    no_docker: bool,

    /// Generate a ConfigMap for application settings instead of a Secret.
    #[arg(long)]
    use_config_map: bool,

    /// Print the manifests instead of building, pushing and applying.
    #[arg(long)]
    dry_run: bool,

    /// Format of the printed manifests.
    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
    output: OutputFormat,

    /// Stream kubectl output while applying.
    #[arg(long)]
    show_output: bool,
}

fn non_empty(value: &str) -> Result<String, String> {
    if value.trim().is_empty() {
        Err("must not be empty".to_string())
    } else {
        Ok(value.to_string())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration file: {0}")]
    Config(#[from] config::Error),

    #[error("{stage} failed: {err}")]
    Deploy { stage: deploy::Stage, err: deploy::Error },
}

impl From<deploy::Error> for Error {
    fn from(err: deploy::Error) -> Self {
        Error::Deploy {
            stage: err.stage(),
            err,
        }
    }
}

/// Read configuration file from disk and merge it with the
/// `default.toml` built-in config.
///
/// If a configuration file name is not set explicitly, this function will
/// detect whether a config file with the default file name exists in the
/// source directory and use it implicitly.
fn read_config(args: &Cli) -> Result<config::File, Error> {
    const DEFAULT_CONFIG_FILE: &str = "funcdeploy.toml";

    let config_path = PathBuf::from(&args.source_directory).join(DEFAULT_CONFIG_FILE);

    let config_file = match &args.config {
        None if config_path.is_file() => Some(config_path.to_string_lossy().into_owned()),
        None => None,
        Some(c) => Some(c.clone()),
    };

    let cfg = match config_file {
        Some(config_file) => config::File::default_with_user_config_file(&config_file)?,
        None => config::File::default(),
    };
    if let Some(description) = &cfg.description {
        debug!("Using configuration: {description}");
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(_) => std::process::exit(0),
        Err(err) => {
            error!("fatal: {}", err);
            std::process::exit(1)
        }
    }
}

async fn run() -> Result<(), Error> {
    env_logger::init();

    let args = Cli::parse();
    let cfg = read_config(&args)?;

    let source_dir = PathBuf::from(&args.source_directory);
    let settings = LocalSettings {
        path: source_dir.join(&cfg.project.settings_file),
    };
    let runtime = match settings.secrets() {
        Ok(values) => WorkerRuntime::detect(&values),
        Err(err) => {
            warn!("Could not detect worker runtime: {err}");
            WorkerRuntime::Unknown
        }
    };
    info!("Worker runtime: {:?}", runtime);

    let request = DeploymentRequest {
        name: args.name,
        namespace: args.namespace.unwrap_or(cfg.deploy.namespace),
        registry: args.registry,
        image_name: args.image_name,
        pull_secret: args.pull_secret,
        secrets_collection_name: args.secrets_name,
        config_map_name: args.config_map_name,
        use_config_map: args.use_config_map,
        polling_interval: args.polling_interval,
        cooldown_period: args.cooldown_period,
        dry_run: args.dry_run,
        no_docker: args.no_docker,
        show_output: args.show_output,
    };

    let deployer = Deployer {
        images: docker::Docker {
            program: cfg.tools.docker,
            image_root: cfg.project.image_root.clone(),
            host_file: cfg.project.host_file.clone(),
            binding_file: cfg.project.binding_file.clone(),
        },
        cluster: kubectl::Kubectl {
            program: cfg.tools.kubectl,
        },
        builder: project::Dotnet {
            program: cfg.tools.dotnet,
        },
        generator: manifest::Keda {
            default_polling_interval: cfg.deploy.polling_interval,
            default_cooldown_period: cfg.deploy.cooldown_period,
        },
        secrets: settings,
        project: Project {
            dir: source_dir,
            runtime,
            layout: cfg.project,
        },
        format: args.output,
    };

    match deployer.deploy(&request, &mut std::io::stdout()).await? {
        Outcome::Previewed { manifests } => info!("Dry run: printed {manifests} manifest(s)"),
        Outcome::Applied { manifests } => info!(
            "Deployed {} to namespace {}: applied {manifests} manifest(s)",
            request.name, request.namespace
        ),
    }
    Ok(())
}
