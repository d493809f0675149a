/// Everything the caller asks for in a single deployment attempt.
/// The orchestrator only ever reads it.
#[derive(Debug, Clone, Default)]
pub struct DeploymentRequest {
    /// Workload name; every generated object is named after it.
    pub name: String,
    pub namespace: String,
    /// Registry to build and push `<registry>/<name>` to.
    pub registry: Option<String>,
    /// Existing image to deploy as-is.
    pub image_name: Option<String>,
    pub pull_secret: Option<String>,
    /// Existing Secret to load settings from instead of generating one.
    pub secrets_collection_name: Option<String>,
    /// Existing ConfigMap to load settings from instead of generating one.
    pub config_map_name: Option<String>,
    pub use_config_map: bool,
    pub polling_interval: Option<u32>,
    pub cooldown_period: Option<u32>,
    pub dry_run: bool,
    pub no_docker: bool,
    /// Stream cluster tool output instead of capturing it.
    pub show_output: bool,
}
