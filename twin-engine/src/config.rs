use std::time::Duration;

use twin_core::env_flag;

/// Engine configuration. Builder overrides win over the environment;
/// the env names are stable contracts.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub host: String,
    /// 0 means "any free port"; the bound port is retrievable after
    /// start.
    pub port: u16,
    /// Prefix every component endpoint mounts under, e.g. `/api`.
    pub base_path: String,
    pub body_limit_bytes: usize,
    pub shutdown_timeout: Duration,
    /// Production mode suppresses stack traces in error envelopes.
    pub production: bool,
    pub enable_compression: bool,
    /// Legacy mode: collapse the primary queues onto the collector
    /// queue. Not recommended; logged as a warning at scheduler start.
    pub single_queue: bool,
    pub upload_concurrency: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            base_path: String::new(),
            body_limit_bytes: 25 * 1024 * 1024,
            shutdown_timeout: Duration::from_secs(30),
            production: false,
            enable_compression: false,
            single_queue: false,
            upload_concurrency: 2,
        }
    }
}

impl EngineOptions {
    /// Defaults plus the environment: `TWIN_ENV=production` and
    /// `ENABLE_COMPRESSION`.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        options.production = std::env::var("TWIN_ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);
        options.enable_compression = env_flag("ENABLE_COMPRESSION");
        options
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_single_queue(mut self) -> Self {
        self.single_queue = true;
        self
    }

    pub fn with_upload_concurrency(mut self, concurrency: usize) -> Self {
        self.upload_concurrency = concurrency.max(1);
        self
    }
}
