//! Engine lifecycle: validation, migration, injection, HTTP bind,
//! scheduler hand-off, and the ordered idempotent shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use twin_auth::{make_provider, AuthMode, AuthOptions, UserDirectory};
use twin_blob::{BlobStore, MemoryBlobStore};
use twin_component::{ComponentContext, ComponentHandle, ComponentRegistry, EndpointSpec};
use twin_core::{EventBus, TwinError, TwinResult};
use twin_queue::{JobQueue, MemoryJobQueue, QueueStats, WorkerHandle};
use twin_store::{MemoryRecordStore, MigrationReport, RecordStore, UserStore};

use crate::config::EngineOptions;
use crate::http::{build_router, join_paths, HealthCheck, HttpDeps};
use crate::scheduler::Scheduler;
use crate::uploads::start_upload_worker;

/// Builder for [`Engine`]. Defaults run everything in memory, which is
/// what tests and local development want; production hosts swap in
/// durable stores.
pub struct EngineBuilder {
    options: EngineOptions,
    auth_options: AuthOptions,
    records: Arc<dyn RecordStore>,
    users: Arc<dyn UserStore>,
    blobs: Arc<dyn BlobStore>,
    queue: Arc<dyn JobQueue>,
    registry: ComponentRegistry,
    health_checks: Vec<(String, HealthCheck)>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        let memory = Arc::new(MemoryRecordStore::new());
        Self {
            options: EngineOptions::from_env(),
            auth_options: AuthOptions::from_env(),
            records: memory.clone(),
            users: memory,
            blobs: Arc::new(MemoryBlobStore::new()),
            queue: Arc::new(MemoryJobQueue::new()),
            registry: ComponentRegistry::new(),
            health_checks: Vec::new(),
        }
    }
}

impl EngineBuilder {
    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn auth(mut self, auth_options: AuthOptions) -> Self {
        self.auth_options = auth_options;
        self
    }

    pub fn record_store(
        mut self,
        records: Arc<dyn RecordStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        self.records = records;
        self.users = users;
        self
    }

    pub fn blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = blobs;
        self
    }

    pub fn queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = queue;
        self
    }

    /// Register a component. Duplicate `{variant, name}` pairs are
    /// rejected.
    pub fn register(mut self, component: ComponentHandle) -> TwinResult<Self> {
        self.registry.register(component)?;
        Ok(self)
    }

    pub fn health_check(mut self, name: impl Into<String>, check: HealthCheck) -> Self {
        self.health_checks.push((name.into(), check));
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            options: self.options,
            auth_options: self.auth_options,
            records: self.records,
            users: self.users,
            blobs: self.blobs,
            queue: self.queue,
            registry: Arc::new(self.registry),
            health_checks: self.health_checks,
            events: EventBus::new(),
        }
    }
}

/// One validated line of the dry-run report.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentCheck {
    pub variant: String,
    pub name: String,
    pub table: Option<String>,
    pub schedule: Option<String>,
    pub endpoints: usize,
}

/// What `validate` found. `start` refuses to run unless this is clean.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub components: Vec<ComponentCheck>,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// The configured engine, ready to validate or start.
pub struct Engine {
    options: EngineOptions,
    auth_options: AuthOptions,
    records: Arc<dyn RecordStore>,
    users: Arc<dyn UserStore>,
    blobs: Arc<dyn BlobStore>,
    queue: Arc<dyn JobQueue>,
    registry: Arc<ComponentRegistry>,
    health_checks: Vec<(String, HealthCheck)>,
    events: EventBus,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Dry-run: check every component and the configuration without
    /// mutating any state.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if let Err(e) = self.auth_options.validate() {
            report.errors.push(format!("auth: {e}"));
        }

        let ctx = self.component_context();
        let mut routes_seen: Vec<(twin_component::Method, String)> = Vec::new();

        for component in self.registry.all() {
            let config = component.configuration();
            let mut schedule = None;

            if let Some(schema) = component.table_schema() {
                if let Err(e) = twin_store::validate_table_name(&schema.name) {
                    report.errors.push(format!("{}: {e}", config.name));
                }
            }

            if let Some(collector) = component.as_collector() {
                schedule = Some(collector.cron_pattern().to_string());
                if let Err(e) = twin_queue::parse_cron(collector.cron_pattern()) {
                    report.errors.push(format!("{}: {e}", config.name));
                }
            }

            if let Some(harvester) = component.as_harvester() {
                let hc = harvester.harvester_config();
                if hc.source.is_none() {
                    report
                        .errors
                        .push(format!("{}: harvester has no source", config.name));
                }
                if let Err(e) = hc.parsed_source_range() {
                    report.errors.push(format!("{}: {e}", config.name));
                }
                if hc.trigger_mode.uses_schedule() {
                    match hc.schedule.as_deref().filter(|s| !s.is_empty()) {
                        Some(pattern) => {
                            schedule = Some(pattern.to_string());
                            if let Err(e) = twin_queue::parse_cron(pattern) {
                                report.errors.push(format!("{}: {e}", config.name));
                            }
                        }
                        None => report.errors.push(format!(
                            "{}: scheduled trigger mode without a schedule",
                            config.name
                        )),
                    }
                }
            }

            let endpoints = match component.endpoints(&ctx) {
                Ok(endpoints) => {
                    let mount = join_paths(&self.options.base_path, &config.endpoint);
                    for spec in &endpoints {
                        let key = (spec.method, join_paths(&mount, &spec.path));
                        if routes_seen.contains(&key) {
                            report.errors.push(format!(
                                "{}: duplicate route {} {}",
                                config.name,
                                key.0.as_str(),
                                key.1
                            ));
                        } else {
                            routes_seen.push(key);
                        }
                    }
                    endpoints.len()
                }
                Err(e) => {
                    report.errors.push(format!("{}: {e}", config.name));
                    0
                }
            };

            report.components.push(ComponentCheck {
                variant: component.variant().as_str().to_string(),
                name: config.name.clone(),
                table: component.table_schema().map(|s| s.name),
                schedule,
                endpoints,
            });
        }

        report
    }

    fn component_context(&self) -> ComponentContext {
        ComponentContext::new(self.records.clone(), self.blobs.clone())
            .with_uploads(self.queue.clone())
    }

    /// Create or additively migrate every component table.
    async fn migrate(&self) -> TwinResult<Vec<MigrationReport>> {
        let mut reports = Vec::new();
        for component in self.registry.all() {
            let Some(schema) = component.table_schema() else {
                continue;
            };
            let report = self.records.ensure_table(&schema).await?;
            if report.created {
                info!(table = %report.table, "created table");
            } else if !report.added_columns.is_empty() {
                info!(table = %report.table, columns = ?report.added_columns, "migrated table");
            }
            reports.push(report);
        }
        Ok(reports)
    }

    /// Start the engine: validate, migrate, bind HTTP, hand off to the
    /// scheduler.
    pub async fn start(self) -> TwinResult<RunningEngine> {
        let report = self.validate();
        if !report.is_ok() {
            return Err(TwinError::configuration(format!(
                "invalid engine configuration: {}",
                report.errors.join("; ")
            ))
            .into_anyhow());
        }

        let migrations = self.migrate().await?;

        let ctx = self.component_context();
        let auth = make_provider(&self.auth_options)?;
        let directory = if self.auth_options.resolved_mode() == AuthMode::None {
            Arc::new(UserDirectory::disabled(
                self.users.clone(),
                self.auth_options.anonymous_user_id.clone(),
            ))
        } else {
            Arc::new(UserDirectory::new(self.users.clone()))
        };

        let mut routes: Vec<(String, EndpointSpec)> = Vec::new();
        for component in self.registry.all() {
            let mount = join_paths(&self.options.base_path, &component.configuration().endpoint);
            for spec in component.endpoints(&ctx)? {
                routes.push((mount.clone(), spec));
            }
        }

        let is_shutting_down = Arc::new(AtomicBool::new(false));
        let deps = HttpDeps {
            auth,
            directory,
            production: self.options.production,
            body_limit_bytes: self.options.body_limit_bytes,
            is_shutting_down: is_shutting_down.clone(),
            health_checks: Arc::new(self.health_checks),
            enable_compression: self.options.enable_compression,
        };
        let router = build_router(routes, deps);

        let listener = TcpListener::bind((self.options.host.as_str(), self.options.port))
            .await
            .map_err(|e| {
                TwinError::configuration(format!(
                    "cannot bind {}:{}: {e}",
                    self.options.host, self.options.port
                ))
                .into_anyhow()
            })?;
        let port = listener
            .local_addr()
            .map_err(|e| TwinError::configuration(e.to_string()).into_anyhow())?
            .port();

        let shutdown = Arc::new(Notify::new());
        let server = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let result = axum::serve(listener, router)
                    .with_graceful_shutdown(async move { shutdown.notified().await })
                    .await;
                if let Err(e) = result {
                    warn!(error = %e, "http server exited with an error");
                }
            })
        };

        let scheduler = Scheduler::start(
            self.registry.clone(),
            ctx.clone(),
            self.events.clone(),
            self.queue.clone(),
            &self.options,
        )
        .await?;
        let upload_worker =
            start_upload_worker(self.queue.clone(), ctx, self.options.upload_concurrency);

        info!(
            host = %self.options.host,
            port,
            components = self.registry.len(),
            "engine started"
        );

        Ok(RunningEngine {
            port,
            options: self.options,
            events: self.events,
            queue: self.queue,
            records: self.records,
            is_shutting_down,
            migrations,
            parts: tokio::sync::Mutex::new(Some(StopParts {
                shutdown,
                server,
                scheduler,
                upload_worker,
            })),
        })
    }
}

struct StopParts {
    shutdown: Arc<Notify>,
    server: JoinHandle<()>,
    scheduler: Scheduler,
    upload_worker: WorkerHandle,
}

/// A started engine. `stop` is idempotent: the first call runs the
/// ordered shutdown, later calls return promptly.
pub struct RunningEngine {
    port: u16,
    options: EngineOptions,
    events: EventBus,
    queue: Arc<dyn JobQueue>,
    records: Arc<dyn RecordStore>,
    is_shutting_down: Arc<AtomicBool>,
    migrations: Vec<MigrationReport>,
    parts: tokio::sync::Mutex<Option<StopParts>>,
}

impl std::fmt::Debug for RunningEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningEngine")
            .field("port", &self.port)
            .field("is_shutting_down", &self.is_shutting_down)
            .field("migrations", &self.migrations)
            .finish_non_exhaustive()
    }
}

impl RunningEngine {
    /// The actually bound port (useful with `port = 0`).
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// What the startup migration pass did, per table.
    pub fn migrations(&self) -> &[MigrationReport] {
        &self.migrations
    }

    pub async fn queue_stats(&self) -> TwinResult<QueueStats> {
        self.queue
            .stats()
            .await
            .map_err(|e| TwinError::queue(e.to_string()).into_anyhow())
    }

    pub async fn stop(&self) -> TwinResult<()> {
        let mut guard = self.parts.lock().await;
        let Some(parts) = guard.take() else {
            return Ok(());
        };

        let started = Instant::now();
        let budget = self.options.shutdown_timeout;
        let remaining =
            |started: Instant| budget.saturating_sub(started.elapsed()).max(Duration::from_millis(1));

        // 1. Health flips unhealthy, 2. listener refuses new work.
        self.is_shutting_down.store(true, Ordering::SeqCst);
        parts.shutdown.notify_waiters();
        if tokio::time::timeout(remaining(started), parts.server)
            .await
            .is_err()
        {
            warn!("http server did not stop within the shutdown budget");
        }

        // 3. Workers drain in-flight jobs within the remaining budget.
        if tokio::time::timeout(remaining(started), async {
            let _ = parts.scheduler.shutdown().await;
            let _ = parts.upload_worker.shutdown().await;
        })
        .await
        .is_err()
        {
            warn!("workers did not drain within the shutdown budget");
        }

        // 4. Queues get 3 seconds of grace before we give up on the
        // transport.
        let queue_grace = Duration::from_secs(3).min(remaining(started));
        match tokio::time::timeout(queue_grace, self.queue.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "queue close failed"),
            Err(_) => {
                warn!("queue close exceeded its grace period, abandoning the transport")
            }
        }

        // 5. Finally the record store.
        self.records.close().await?;

        info!(elapsed = ?started.elapsed(), "engine stopped");
        Ok(())
    }
}
