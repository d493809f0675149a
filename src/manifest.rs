//! Kubernetes manifests for a function workload scaled by KEDA.

use crate::triggers::TriggersPayload;
use clap::ValueEnum;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Pod template annotation holding a digest of generated settings.
pub const SETTINGS_CHECKSUM_ANNOTATION: &str = "funcdeploy/settings-checksum";

const HTTP_PORT: u16 = 80;

/// Objects in the order they must be applied.
pub type ManifestSet = Vec<Value>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("serialize yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("serialize json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything the generated objects are derived from.
#[derive(Debug)]
pub struct WorkloadSpec<'a> {
    pub name: &'a str,
    pub image: &'a str,
    pub namespace: &'a str,
    pub triggers: &'a TriggersPayload,
    pub secrets: &'a BTreeMap<String, String>,
    pub pull_secret: Option<&'a str>,
    pub secrets_collection_name: Option<&'a str>,
    pub config_map_name: Option<&'a str>,
    pub use_config_map: bool,
    pub polling_interval: Option<u32>,
    pub cooldown_period: Option<u32>,
}

pub trait ManifestGenerator {
    fn generate(&self, workload: &WorkloadSpec) -> ManifestSet;
}

/// Generates Deployments, a Service for HTTP functions, settings and a
/// KEDA ScaledObject for everything else.
pub struct Keda {
    pub default_polling_interval: u32,
    pub default_cooldown_period: u32,
}

/// Where containers load their settings from.
enum Settings {
    Secret(String),
    ConfigMap(String),
}

impl Settings {
    fn env_from(&self) -> Value {
        match self {
            Settings::Secret(name) => json!({"secretRef": {"name": name}}),
            Settings::ConfigMap(name) => json!({"configMapRef": {"name": name}}),
        }
    }
}

impl ManifestGenerator for Keda {
    fn generate(&self, workload: &WorkloadSpec) -> ManifestSet {
        let mut manifests = ManifestSet::new();

        let (settings, checksum) = match (workload.secrets_collection_name, workload.config_map_name) {
            (Some(secret), _) => (Settings::Secret(secret.to_string()), None),
            (None, Some(config_map)) => (Settings::ConfigMap(config_map.to_string()), None),
            (None, None) => {
                let (settings, object) = if workload.use_config_map {
                    (
                        Settings::ConfigMap(workload.name.to_string()),
                        json!({
                            "apiVersion": "v1",
                            "kind": "ConfigMap",
                            "metadata": metadata(workload.name, workload.namespace),
                            "data": workload.secrets,
                        }),
                    )
                } else {
                    (
                        Settings::Secret(workload.name.to_string()),
                        json!({
                            "apiVersion": "v1",
                            "kind": "Secret",
                            "metadata": metadata(workload.name, workload.namespace),
                            "type": "Opaque",
                            "stringData": workload.secrets,
                        }),
                    )
                };
                manifests.push(object);
                (settings, Some(settings_checksum(workload.secrets)))
            }
        };

        let (http, other): (Vec<_>, Vec<_>) = workload
            .triggers
            .function_bindings
            .iter()
            .partition(|(_, document)| is_http(document));

        if !http.is_empty() {
            let name = format!("{}-http", workload.name);
            let functions = http.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>();
            let pod = Pod {
                workload,
                settings: &settings,
                checksum: checksum.as_deref(),
                functions: &functions,
                http: true,
            };
            manifests.push(deployment(&name, workload.namespace, Some(1), pod));
            manifests.push(service(&name, workload.namespace));
        }

        if !other.is_empty() {
            let functions = other.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>();
            let pod = Pod {
                workload,
                settings: &settings,
                checksum: checksum.as_deref(),
                functions: &functions,
                http: false,
            };
            manifests.push(deployment(workload.name, workload.namespace, None, pod));

            let triggers = other
                .iter()
                .flat_map(|(_, document)| bindings(document))
                .filter_map(|binding| scaler_trigger(binding, &workload.triggers.host_config))
                .collect::<Vec<_>>();
            manifests.push(json!({
                "apiVersion": "keda.sh/v1alpha1",
                "kind": "ScaledObject",
                "metadata": metadata(workload.name, workload.namespace),
                "spec": {
                    "scaleTargetRef": {"name": workload.name},
                    "pollingInterval": workload.polling_interval.unwrap_or(self.default_polling_interval),
                    "cooldownPeriod": workload.cooldown_period.unwrap_or(self.default_cooldown_period),
                    "triggers": triggers,
                },
            }));
        }

        manifests
    }
}

fn metadata(name: &str, namespace: &str) -> Value {
    json!({
        "name": name,
        "namespace": namespace,
        "labels": {"app": name},
    })
}

fn settings_checksum(secrets: &BTreeMap<String, String>) -> String {
    let canonical = secrets
        .iter()
        .map(|(key, value)| format!("{key}={value}\n"))
        .collect::<String>();
    sha256::digest(canonical)
}

fn bindings(document: &Value) -> impl Iterator<Item = &Value> {
    document
        .get("bindings")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn binding_type(binding: &Value) -> Option<&str> {
    binding.get("type").and_then(Value::as_str)
}

fn is_http(document: &Value) -> bool {
    bindings(document)
        .filter_map(binding_type)
        .any(|typ| typ.eq_ignore_ascii_case("httpTrigger"))
}

/// KEDA trigger for a function trigger binding. Other bindings yield nothing.
fn scaler_trigger(binding: &Value, host_config: &Value) -> Option<Value> {
    let typ = binding_type(binding)?;
    let lowercase = typ.to_ascii_lowercase();
    let kind = lowercase.strip_suffix("trigger")?;
    let scaler = match kind {
        "queue" => "azure-queue".to_string(),
        "blob" => "azure-blob".to_string(),
        "servicebus" => "azure-servicebus".to_string(),
        "eventhub" => "azure-eventhub".to_string(),
        other => other.to_string(),
    };

    let mut metadata = Map::new();
    for (key, value) in binding.as_object()? {
        if matches!(key.as_str(), "type" | "direction" | "name") {
            continue;
        }
        let value = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        let key = if key == "connection" {
            "connectionFromEnv".to_string()
        } else {
            key.clone()
        };
        metadata.insert(key, Value::String(value));
    }

    if scaler == "azure-queue" && !metadata.contains_key("queueLength") {
        if let Some(batch_size) = host_config.pointer("/extensions/queues/batchSize") {
            let batch_size = match batch_size {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            metadata.insert("queueLength".into(), Value::String(batch_size));
        }
    }

    Some(json!({"type": scaler, "metadata": metadata}))
}

struct Pod<'a> {
    workload: &'a WorkloadSpec<'a>,
    settings: &'a Settings,
    checksum: Option<&'a str>,
    functions: &'a [&'a str],
    http: bool,
}

fn deployment(name: &str, namespace: &str, replicas: Option<u32>, pod: Pod) -> Value {
    let env = pod
        .functions
        .iter()
        .enumerate()
        .map(|(i, function)| {
            json!({
                "name": format!("AzureFunctionsJobHost__functions__{i}"),
                "value": function,
            })
        })
        .collect::<Vec<_>>();

    let mut container = Map::new();
    container.insert("name".into(), json!(name));
    container.insert("image".into(), json!(pod.workload.image));
    container.insert("env".into(), json!(env));
    container.insert("envFrom".into(), json!([pod.settings.env_from()]));
    if pod.http {
        container.insert("ports".into(), json!([{"containerPort": HTTP_PORT}]));
    }

    let mut pod_spec = Map::new();
    pod_spec.insert("containers".into(), json!([container]));
    if let Some(pull_secret) = pod.workload.pull_secret {
        pod_spec.insert("imagePullSecrets".into(), json!([{"name": pull_secret}]));
    }

    let mut template_metadata = Map::new();
    template_metadata.insert("labels".into(), json!({"app": name}));
    if let Some(checksum) = pod.checksum {
        template_metadata.insert(
            "annotations".into(),
            json!({SETTINGS_CHECKSUM_ANNOTATION: checksum}),
        );
    }

    let mut spec = Map::new();
    if let Some(replicas) = replicas {
        spec.insert("replicas".into(), json!(replicas));
    }
    spec.insert("selector".into(), json!({"matchLabels": {"app": name}}));
    spec.insert(
        "template".into(),
        json!({"metadata": template_metadata, "spec": pod_spec}),
    );

    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": metadata(name, namespace),
        "spec": spec,
    })
}

fn service(name: &str, namespace: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": metadata(name, namespace),
        "spec": {
            "type": "LoadBalancer",
            "selector": {"app": name},
            "ports": [{"protocol": "TCP", "port": HTTP_PORT, "targetPort": HTTP_PORT}],
        },
    })
}

/// `Kind/name` of a manifest, for log and error messages.
pub fn describe(manifest: &Value) -> String {
    let kind = manifest.get("kind").and_then(Value::as_str).unwrap_or("Object");
    let name = manifest
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>");
    format!("{kind}/{name}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

pub fn serialize(manifests: &ManifestSet, format: OutputFormat) -> Result<String, Error> {
    match format {
        OutputFormat::Yaml => Ok(manifests
            .iter()
            .map(serde_yaml::to_string)
            .collect::<Result<Vec<_>, _>>()?
            .join("---\n")),
        OutputFormat::Json => {
            let list = json!({
                "apiVersion": "v1",
                "kind": "List",
                "items": manifests,
            });
            Ok(serde_json::to_string_pretty(&list)? + "\n")
        }
    }
}
