//! Cron registration, debounced source triggers, and the worker pools
//! that drive component runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use twin_component::{ComponentContext, ComponentRegistry, ComponentVariant};
use twin_core::{EventBus, EventKind, EventPat, ListenerId, TwinError, TwinResult};
use twin_queue::{
    EnqueueOpts, Job, JobHandler, JobQueue, QueueName, QueuePolicy, Worker, WorkerHandle,
};

use crate::config::EngineOptions;
use crate::debounce::DebouncedTrigger;
use crate::runner::{run_collector, run_harvester};

struct SchedulerState {
    registry: Arc<ComponentRegistry>,
    ctx: ComponentContext,
    events: EventBus,
}

/// The running scheduler: registered repeating jobs, the debounced
/// trigger map, and the worker pools.
pub struct Scheduler {
    workers: Vec<WorkerHandle>,
    listener_id: Option<ListenerId>,
    events: EventBus,
    /// Harvester name → its debounced trigger. Mutated only here at
    /// registration; event propagation reads a snapshot index.
    debouncers: HashMap<String, DebouncedTrigger>,
}

impl Scheduler {
    pub async fn start(
        registry: Arc<ComponentRegistry>,
        ctx: ComponentContext,
        events: EventBus,
        queue: Arc<dyn JobQueue>,
        options: &EngineOptions,
    ) -> TwinResult<Scheduler> {
        let (collector_queue, harvester_queue) = if options.single_queue {
            warn!(
                "legacy single-queue mode is enabled; all primary queues collapse onto the \
                 collector queue. This mode is not recommended."
            );
            (QueueName::Collectors, QueueName::Collectors)
        } else {
            (QueueName::Collectors, QueueName::Harvesters)
        };

        // Repeating jobs for collectors.
        for component in registry.collectors() {
            let collector = component.as_collector().expect("collector variant");
            queue
                .upsert_repeating(
                    collector_queue,
                    component.name(),
                    collector.cron_pattern(),
                    json!({"type": "collector", "triggeredBy": "schedule"}),
                )
                .await
                .map_err(|e| TwinError::queue(e.to_string()).into_anyhow())?;
        }

        // Repeating jobs for scheduled harvesters, debounced triggers
        // for source-driven ones ("both" gets both wirings).
        let mut debouncers = HashMap::new();
        let mut source_index: HashMap<String, Vec<DebouncedTrigger>> = HashMap::new();

        for component in registry.harvesters() {
            let harvester = component.as_harvester().expect("harvester variant");
            let hc = harvester.harvester_config();
            let name = component.name().to_string();

            if hc.trigger_mode.uses_schedule() {
                if let Some(schedule) = hc.schedule.as_deref().filter(|s| !s.is_empty()) {
                    queue
                        .upsert_repeating(
                            harvester_queue,
                            &name,
                            schedule,
                            json!({"type": "harvester", "triggeredBy": "schedule"}),
                        )
                        .await
                        .map_err(|e| TwinError::queue(e.to_string()).into_anyhow())?;
                }
            }

            if hc.trigger_mode.listens_to_source() {
                let Some(source) = hc.source.clone() else {
                    continue;
                };
                let queue = queue.clone();
                let job_name = name.clone();
                let payload = json!({
                    "type": "harvester",
                    "triggeredBy": "source-event",
                    "source": source,
                });
                let trigger = DebouncedTrigger::new(
                    Duration::from_millis(hc.debounce_ms),
                    move || -> futures::future::BoxFuture<'static, ()> {
                        let queue = queue.clone();
                        let job_name = job_name.clone();
                        let payload = payload.clone();
                        Box::pin(async move {
                            let opts = EnqueueOpts::default()
                                .with_attempts(3)
                                .with_backoff(Duration::from_secs(5));
                            if let Err(e) = queue
                                .enqueue(harvester_queue, &job_name, payload, opts)
                                .await
                            {
                                warn!(harvester = %job_name, error = %e, "source-trigger enqueue failed");
                            }
                        })
                    },
                );
                source_index.entry(source).or_default().push(trigger.clone());
                debouncers.insert(name, trigger);
            }
        }

        // One subscriber propagates collector completions to matching
        // harvesters.
        let listener_id = if source_index.is_empty() {
            None
        } else {
            let source_index = Arc::new(source_index);
            Some(events.on(
                EventPat::Exact(EventKind::CollectorCompleted),
                Arc::new(move |event| {
                    let source_index = source_index.clone();
                    let source = event.component_name.clone();
                    Box::pin(async move {
                        if let Some(triggers) = source_index.get(&source) {
                            for trigger in triggers {
                                trigger.call();
                            }
                        }
                        Ok(())
                    })
                }),
            ))
        };

        // Worker pools.
        let state = Arc::new(SchedulerState {
            registry: registry.clone(),
            ctx,
            events: events.clone(),
        });
        let handler = dispatch_handler(state);

        let workers = if options.single_queue {
            let concurrency = registry.len().max(1);
            vec![Worker::start(
                queue.clone(),
                QueueName::Collectors,
                QueuePolicy::defaults_for(QueueName::Collectors).with_concurrency(concurrency),
                handler,
            )]
        } else {
            [QueueName::Collectors, QueueName::Harvesters, QueueName::Priority]
                .into_iter()
                .map(|name| {
                    Worker::start(
                        queue.clone(),
                        name,
                        QueuePolicy::defaults_for(name),
                        handler.clone(),
                    )
                })
                .collect()
        };

        Ok(Scheduler {
            workers,
            listener_id,
            events,
            debouncers,
        })
    }

    pub fn debouncer(&self, harvester: &str) -> Option<&DebouncedTrigger> {
        self.debouncers.get(harvester)
    }

    /// Stop the worker pools, waiting for in-flight jobs.
    pub async fn shutdown(self) -> TwinResult<()> {
        if let Some(id) = self.listener_id {
            self.events.off(id);
        }
        for worker in self.workers {
            worker
                .shutdown()
                .await
                .map_err(|e| TwinError::queue(e.to_string()).into_anyhow())?;
        }
        Ok(())
    }
}

fn dispatch_handler(state: Arc<SchedulerState>) -> JobHandler {
    Arc::new(move |job| {
        let state = state.clone();
        Box::pin(async move { dispatch(&state, job).await })
    })
}

/// Resolve `job.name` to a component and run it. Unknown names are a
/// no-op success so stale queue entries drain quietly.
async fn dispatch(state: &SchedulerState, job: Job) -> anyhow::Result<()> {
    let job_type = job
        .payload
        .get("type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();

    match job_type {
        "collector" => {
            let Some(component) = state.registry.get(ComponentVariant::Collector, &job.job_name)
            else {
                debug!(job = %job.job_name, "no collector for job, skipping");
                return Ok(());
            };
            let collector = component.as_collector().expect("collector variant");
            run_collector(collector, &state.ctx, &state.events).await
        }
        "harvester" => {
            let Some(component) = state.registry.get(ComponentVariant::Harvester, &job.job_name)
            else {
                debug!(job = %job.job_name, "no harvester for job, skipping");
                return Ok(());
            };
            let harvester = component.as_harvester().expect("harvester variant");
            run_harvester(harvester, &state.ctx, &state.events)
                .await
                .map(|_| ())
        }
        other => {
            debug!(job = %job.job_name, job_type = other, "unknown job type, skipping");
            Ok(())
        }
    }
}
