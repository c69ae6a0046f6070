//! # twin-engine: the TwinRS engine
//!
//! Orchestrates everything the other crates provide: validates and
//! migrates component tables, injects the stores, binds the HTTP
//! surface, registers cron jobs and debounced source triggers, runs
//! the worker pools, and shuts the whole thing down in order.
//!
//! ```no_run
//! use std::sync::Arc;
//! use twin_component::{AssetsManager, ComponentConfig, ComponentHandle};
//! use twin_engine::{Engine, EngineOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let engine = Engine::builder()
//!     .options(EngineOptions::from_env().with_port(8080))
//!     .register(ComponentHandle::Assets(Arc::new(AssetsManager::new(
//!         ComponentConfig::new("gltf", "model/gltf-binary"),
//!     ))))?
//!     .build();
//!
//! let running = engine.start().await?;
//! println!("listening on {}", running.port());
//! # running.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod debounce;
pub mod engine;
pub mod http;
pub mod runner;
pub mod scheduler;
pub mod uploads;

pub use config::EngineOptions;
pub use debounce::DebouncedTrigger;
pub use engine::{ComponentCheck, Engine, EngineBuilder, RunningEngine, ValidationReport};
pub use http::{HealthCheck, HttpDeps};
pub use runner::{run_collector, run_harvester};
pub use scheduler::Scheduler;
pub use uploads::start_upload_worker;
