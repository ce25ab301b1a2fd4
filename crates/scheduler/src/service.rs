//! Scheduling service: routes bindings to the local or clustered engine and
//! owns the execution record table.

use std::sync::Arc;

use {
    chrono::{DateTime, Utc},
    futures::future::join_all,
    tracing::{debug, info, warn},
    vigil_config::{EngineSettings, VigilConfig, load_engine_settings},
};

use crate::{
    Error,
    engine::TriggerEngine,
    listener::{ExecutionListener, RecordingListener, ResultSink},
    record::ExecutionRecords,
    resolver::JobResolver,
    trigger,
    types::{EngineKind, ExecutionRecord, JobBinding, SchedulerStatus},
};

/// Startup inputs of a [`SchedulingService`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceOptions {
    pub cluster_enabled: bool,
    /// Local engine settings. Without them the local engine stays down.
    pub local: Option<EngineSettings>,
    /// Clustered engine settings, only read when clustering is enabled.
    pub clustered: Option<EngineSettings>,
}

impl ServiceOptions {
    /// Resolve engine settings files under the configured resource root.
    pub fn from_config(config: &VigilConfig) -> Self {
        let root = &config.engines.resource_dir;
        let local = load_engine_settings(root, &config.engines.local_pattern);
        let clustered = if config.cluster.enabled {
            load_engine_settings(root, &config.engines.clustered_pattern)
        } else {
            None
        };
        Self {
            cluster_enabled: config.cluster.enabled,
            local,
            clustered,
        }
    }
}

pub struct SchedulingService {
    cluster_enabled: bool,
    local: Option<Arc<TriggerEngine>>,
    clustered: Option<Arc<TriggerEngine>>,
    records: Arc<ExecutionRecords>,
}

impl SchedulingService {
    /// Build both engines and start them. Start failures are logged and the
    /// service keeps whichever engine came up.
    pub async fn start(
        options: ServiceOptions,
        resolver: Arc<JobResolver>,
        sink: Option<Arc<dyn ResultSink>>,
    ) -> Arc<Self> {
        let records = Arc::new(ExecutionRecords::new());
        let listener: Arc<dyn ExecutionListener> =
            Arc::new(RecordingListener::new(Arc::clone(&records), sink));

        let local = match options.local {
            Some(settings) => Some(
                start_engine(
                    EngineKind::Local,
                    settings,
                    Arc::clone(&resolver),
                    Arc::clone(&listener),
                )
                .await,
            ),
            None => {
                warn!("no local engine settings found, local engine not started");
                None
            },
        };

        let clustered = match (options.cluster_enabled, options.clustered) {
            (false, _) => None,
            (true, Some(settings)) => Some(
                start_engine(EngineKind::Clustered, settings, resolver, listener).await,
            ),
            (true, None) => {
                warn!("clustering enabled but no clustered engine settings found");
                None
            },
        };

        info!(
            cluster_enabled = options.cluster_enabled,
            local = local.is_some(),
            clustered = clustered.is_some(),
            "scheduling service started"
        );

        Arc::new(Self {
            cluster_enabled: options.cluster_enabled,
            local,
            clustered,
            records,
        })
    }

    /// Register a binding on the engine chosen by the routing rule.
    ///
    /// Returns the first planned fire time, or `None` when nothing was
    /// registered (engine down, binding already present, invalid trigger).
    pub async fn schedule(&self, binding: JobBinding) -> Option<DateTime<Utc>> {
        let job_id = binding.job_id.clone();
        let Some(engine) = self.route(&binding).await else {
            warn!(job_id = %job_id, "no running engine, job not scheduled");
            return None;
        };

        let kind = engine.kind();
        match engine.schedule_job(binding.detail(), &binding.trigger).await {
            Ok(first) => {
                info!(
                    job_id = %job_id,
                    engine = %kind,
                    first_fire = %first,
                    "job scheduled"
                );
                Some(first)
            },
            Err(Error::BindingExists { .. }) => {
                debug!(job_id = %job_id, engine = %kind, "job already scheduled");
                None
            },
            Err(e) => {
                warn!(job_id = %job_id, engine = %kind, error = %e, "failed to schedule job");
                None
            },
        }
    }

    /// Remove the binding from both engines and forget its record.
    pub async fn unschedule(&self, job_id: &str) {
        let mut removed = false;
        for engine in self.engines() {
            removed |= engine.delete(job_id).await;
        }
        self.records.remove(job_id);
        if removed {
            info!(job_id, "job unscheduled");
        } else {
            debug!(job_id, "unschedule of unknown job");
        }
    }

    /// Fire an existing binding right away, without waiting for it to finish.
    ///
    /// Returns whether a running engine accepted the request.
    pub async fn execute_now(&self, job_id: &str) -> bool {
        for engine in self.engines() {
            if !engine.is_running().await || !engine.exists(job_id).await {
                continue;
            }
            return match engine.trigger_now(job_id).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(job_id, engine = %engine.kind(), error = %e, "execute now failed");
                    false
                },
            };
        }
        debug!(job_id, "execute now requested for unknown job");
        false
    }

    pub fn is_valid_cron(&self, expression: &str) -> bool {
        trigger::is_valid_cron(expression)
    }

    /// Stop both engines. Safe when either never started.
    pub async fn shutdown(&self) {
        join_all(self.engines().map(|engine| engine.shutdown())).await;
        info!("scheduling service stopped");
    }

    pub fn execution_record(&self, job_id: &str) -> Option<ExecutionRecord> {
        self.records.get(job_id)
    }

    pub fn execution_records(&self) -> Vec<ExecutionRecord> {
        self.records.all()
    }

    /// Which engine holds the binding, local first.
    pub async fn engine_holding(&self, job_id: &str) -> Option<EngineKind> {
        for engine in self.engines() {
            if engine.exists(job_id).await {
                return Some(engine.kind());
            }
        }
        None
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            cluster_enabled: self.cluster_enabled,
            local: match &self.local {
                Some(engine) => Some(engine.status().await),
                None => None,
            },
            clustered: match &self.clustered {
                Some(engine) => Some(engine.status().await),
                None => None,
            },
        }
    }

    // ── Internal ────────────────────────────────────────────────────────

    fn engines(&self) -> impl Iterator<Item = &Arc<TriggerEngine>> {
        self.local.iter().chain(self.clustered.iter())
    }

    /// Clustered iff clustering is on, the binding asks for it, and the
    /// clustered engine runs. Everything else goes local.
    async fn route(&self, binding: &JobBinding) -> Option<&Arc<TriggerEngine>> {
        if self.cluster_enabled
            && binding.cluster_affinity
            && let Some(clustered) = &self.clustered
            && clustered.is_running().await
        {
            return Some(clustered);
        }

        match &self.local {
            Some(local) if local.is_running().await => Some(local),
            _ => None,
        }
    }
}

async fn start_engine(
    kind: EngineKind,
    settings: EngineSettings,
    resolver: Arc<JobResolver>,
    listener: Arc<dyn ExecutionListener>,
) -> Arc<TriggerEngine> {
    let engine = TriggerEngine::new(kind, settings, resolver, listener);
    if let Err(e) = engine.start().await {
        warn!(engine = %kind, error = %e, "engine failed to start");
    }
    engine
}
