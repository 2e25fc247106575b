use serde::Deserialize;

/// Main configuration for the around service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP API configuration
    pub api: ApiConfig,
    /// Session token configuration
    pub auth: AuthConfig,
    /// Search index configuration
    pub search: SearchConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Record store configuration
    pub database: DatabaseConfig,
    /// Post ingestion and query behaviour
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Upper bound for a multipart post submission
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Session token configuration
#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    /// Symmetric HMAC secret shared by issuing and verification
    pub signing_secret: String,
    /// Token lifetime in hours
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("signing_secret", &"<redacted>")
            .field("token_ttl_hours", &self.token_ttl_hours)
            .finish()
    }
}

/// Search index (Elasticsearch-compatible) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Base URL of the index backend
    pub url: String,
    /// Index holding both posts and user credentials
    #[serde(default = "default_index")]
    pub index: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_search_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum number of hits returned by a geo search
    #[serde(default = "default_max_hits")]
    pub max_hits: usize,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket receiving post media; must already exist
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Base URL clients use to fetch public objects, overriding the derived one
    pub public_base_url: Option<String>,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Logical wide-column table receiving post rows
    #[serde(default = "default_table")]
    pub table: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Post ingestion and geo query behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Reject submissions that carry no `image` part
    #[serde(default)]
    pub require_media: bool,
    /// Radius used when a search does not supply `range`
    #[serde(default = "default_radius_km")]
    pub default_radius_km: f64,
}

// Default value functions
fn default_service_name() -> String {
    "around-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    32 << 20 // 32MB
}

fn default_token_ttl_hours() -> i64 {
    24
}

fn default_index() -> String {
    "around".to_string()
}

fn default_search_timeout_secs() -> u64 {
    10
}

fn default_max_hits() -> usize {
    1000
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_table() -> String {
    "post".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_radius_km() -> f64 {
    200.0
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "around-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .set_default("api.port", 8080)?
            .add_source(config::File::with_name("config/around").required(false))
            .add_source(config::File::with_name("/etc/around/around").required(false))
            // AROUND__AUTH__SIGNING_SECRET -> auth.signing_secret
            .add_source(
                config::Environment::with_prefix("AROUND")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would otherwise only fail at request time
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.auth.signing_secret.is_empty(),
            "auth.signing_secret must not be empty"
        );
        self.s3.validate()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            require_media: false,
            default_radius_km: default_radius_km(),
        }
    }
}

impl S3Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.part_size_bytes > 0,
            "s3.part_size_bytes must be greater than zero"
        );
        Ok(())
    }
}

impl AuthConfig {
    pub fn new(signing_secret: impl Into<String>) -> Self {
        Self {
            signing_secret: signing_secret.into(),
            token_ttl_hours: default_token_ttl_hours(),
        }
    }
}
