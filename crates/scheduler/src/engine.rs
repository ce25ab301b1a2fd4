//! Trigger engine: binding table, timer loop, and the fire sequence.
//!
//! One type serves both the local and the clustered instance; they differ
//! only in [`EngineKind`] and settings.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    chrono::{DateTime, Utc},
    tokio::{
        sync::{Mutex, Notify, RwLock, Semaphore},
        task::JoinHandle,
    },
    tracing::{debug, error, info, warn},
    vigil_config::EngineSettings,
};

#[cfg(feature = "metrics")]
use vigil_metrics::{
    counter, engine as engine_metrics, gauge, histogram, labels, scheduler as scheduler_metrics,
};

use crate::{
    Error, Result,
    listener::ExecutionListener,
    resolver::JobResolver,
    trigger::Trigger,
    types::{
        EngineKind, EngineState, EngineStatus, FireOutcome, JobContext, JobDetail, JobId,
        TriggerSpec,
    },
};

struct Binding {
    job: JobDetail,
    trigger: Trigger,
    /// Distinguishes a re-registered binding from the one it replaced.
    generation: u64,
    /// Fires of this binding still executing, scheduled or out-of-band.
    in_flight: usize,
}

pub struct TriggerEngine {
    kind: EngineKind,
    settings: EngineSettings,
    resolver: Arc<JobResolver>,
    listener: Arc<dyn ExecutionListener>,
    bindings: RwLock<HashMap<JobId, Binding>>,
    state: RwLock<EngineState>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
    wake_notify: Arc<Notify>,
    workers: Arc<Semaphore>,
    next_generation: AtomicU64,
}

impl TriggerEngine {
    pub fn new(
        kind: EngineKind,
        settings: EngineSettings,
        resolver: Arc<JobResolver>,
        listener: Arc<dyn ExecutionListener>,
    ) -> Arc<Self> {
        let workers = Arc::new(Semaphore::new(settings.thread_count));
        Arc::new(Self {
            kind,
            settings,
            resolver,
            listener,
            bindings: RwLock::new(HashMap::new()),
            state: RwLock::new(EngineState::Stopped),
            timer_handle: Mutex::new(None),
            wake_notify: Arc::new(Notify::new()),
            workers,
            next_generation: AtomicU64::new(0),
        })
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub async fn is_running(&self) -> bool {
        *self.state.read().await == EngineState::Running
    }

    /// Start the timer loop. Starting a running engine is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.settings.thread_count == 0 {
            return Err(Error::message(format!(
                "{} engine needs at least one worker thread",
                self.kind
            )));
        }

        {
            let mut state = self.state.write().await;
            if *state == EngineState::Running {
                return Ok(());
            }
            *state = EngineState::Running;
        }

        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            engine.timer_loop().await;
        });
        *self.timer_handle.lock().await = Some(handle);

        info!(
            engine = %self.kind,
            instance = %self.settings.instance_name,
            workers = self.settings.thread_count,
            "trigger engine started"
        );
        Ok(())
    }

    /// Stop the timer loop. Fires already handed to workers are not awaited.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.write().await;
            if *state == EngineState::Stopped {
                return;
            }
            *state = EngineState::Stopped;
        }
        self.wake_notify.notify_one();

        if let Some(handle) = self.timer_handle.lock().await.take() {
            handle.abort();
        }
        info!(engine = %self.kind, "trigger engine stopped");
    }

    /// Register a binding. Returns the first planned fire time.
    ///
    /// The existence check and the insert happen under one write lock, so
    /// concurrent registrations of one id leave exactly one binding.
    pub async fn schedule_job(&self, job: JobDetail, spec: &TriggerSpec) -> Result<DateTime<Utc>> {
        if !self.is_running().await {
            return Err(Error::EngineNotRunning { engine: self.kind });
        }

        let mut bindings = self.bindings.write().await;
        if bindings.contains_key(&job.job_id) {
            return Err(Error::BindingExists {
                job_id: job.job_id.to_string(),
                engine: self.kind,
            });
        }

        let trigger = Trigger::new(&job.job_id, spec, Utc::now())?;
        let first = trigger
            .next_fire_at()
            .ok_or_else(|| Error::invalid_trigger(job.job_id.as_str(), "no fire time"))?;

        debug!(
            engine = %self.kind,
            job_id = %job.job_id,
            trigger = %trigger.key().name,
            group = %trigger.key().group,
            first_fire = %first,
            "binding registered"
        );
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        bindings.insert(job.job_id.clone(), Binding {
            job,
            trigger,
            generation,
            in_flight: 0,
        });

        #[cfg(feature = "metrics")]
        gauge!(engine_metrics::BINDINGS, labels::ENGINE => self.kind.as_str())
            .set(bindings.len() as f64);

        drop(bindings);
        self.wake_notify.notify_one();
        Ok(first)
    }

    pub async fn exists(&self, job_id: &str) -> bool {
        self.bindings.read().await.contains_key(job_id)
    }

    /// Remove a binding. Returns whether one existed.
    pub async fn delete(&self, job_id: &str) -> bool {
        let mut bindings = self.bindings.write().await;
        let removed = bindings.remove(job_id).is_some();

        #[cfg(feature = "metrics")]
        gauge!(engine_metrics::BINDINGS, labels::ENGINE => self.kind.as_str())
            .set(bindings.len() as f64);

        drop(bindings);
        if removed {
            self.wake_notify.notify_one();
            debug!(engine = %self.kind, job_id, "binding removed");
        }
        removed
    }

    /// Fire an existing binding right away, outside its schedule.
    ///
    /// Returns once the fire is handed to a worker.
    pub async fn trigger_now(self: &Arc<Self>, job_id: &str) -> Result<()> {
        if !self.is_running().await {
            return Err(Error::EngineNotRunning { engine: self.kind });
        }

        let (job, generation) = {
            let mut bindings = self.bindings.write().await;
            let binding = bindings
                .get_mut(job_id)
                .ok_or_else(|| Error::job_not_found(job_id))?;
            binding.in_flight += 1;
            (binding.job.clone(), binding.generation)
        };

        info!(engine = %self.kind, job_id, "job triggered out of band");
        self.dispatch(job, generation, None);
        Ok(())
    }

    pub async fn job_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<_> = self.bindings.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn next_fire_at(&self, job_id: &str) -> Option<DateTime<Utc>> {
        self.bindings
            .read()
            .await
            .get(job_id)
            .and_then(|b| b.trigger.next_fire_at())
    }

    pub async fn status(&self) -> EngineStatus {
        let bindings = self.bindings.read().await;
        EngineStatus {
            kind: self.kind,
            instance_name: self.settings.instance_name.clone(),
            state: *self.state.read().await,
            binding_count: bindings.len(),
            next_fire_at: bindings
                .values()
                .filter_map(|b| b.trigger.next_fire_at())
                .min(),
        }
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn timer_loop(self: &Arc<Self>) {
        loop {
            if !self.is_running().await {
                break;
            }

            let sleep = self.time_until_next_fire().await;
            if !sleep.is_zero() {
                let notify = Arc::clone(&self.wake_notify);
                tokio::select! {
                    () = tokio::time::sleep(sleep) => {},
                    () = notify.notified() => {
                        debug!(engine = %self.kind, "timer loop woken by notify");
                        continue;
                    },
                }
            }

            if !self.is_running().await {
                break;
            }

            self.process_due_bindings().await;
        }
    }

    async fn time_until_next_fire(&self) -> Duration {
        let bindings = self.bindings.read().await;
        let now = Utc::now();
        bindings
            .values()
            .filter_map(|b| b.trigger.next_fire_at())
            .map(|t| (t - now).to_std().unwrap_or(Duration::ZERO))
            .min()
            .unwrap_or(Duration::from_millis(self.settings.idle_wait_ms))
    }

    async fn process_due_bindings(self: &Arc<Self>) {
        let now = Utc::now();
        let due: Vec<(JobDetail, u64, DateTime<Utc>)> = {
            let mut bindings = self.bindings.write().await;
            let mut due = Vec::new();
            for binding in bindings.values_mut() {
                let Some(scheduled_at) = binding.trigger.advance(now) else {
                    continue;
                };
                if binding.in_flight > 0 {
                    debug!(
                        engine = %self.kind,
                        job_id = %binding.job.job_id,
                        %scheduled_at,
                        "previous fire still running, skipping occurrence"
                    );
                    #[cfg(feature = "metrics")]
                    counter!(scheduler_metrics::MISFIRES_TOTAL, labels::ENGINE => self.kind.as_str())
                        .increment(1);
                    continue;
                }
                // Counted under the write lock so the next tick sees it.
                binding.in_flight += 1;
                due.push((binding.job.clone(), binding.generation, scheduled_at));
            }
            due
        };

        for (job, generation, scheduled_at) in due {
            self.dispatch(job, generation, Some(scheduled_at));
        }
    }

    fn dispatch(
        self: &Arc<Self>,
        job: JobDetail,
        generation: u64,
        scheduled_at: Option<DateTime<Utc>>,
    ) {
        let engine = Arc::clone(self);
        let workers = Arc::clone(&self.workers);
        tokio::spawn(async move {
            let Ok(_permit) = workers.acquire_owned().await else {
                error!(engine = %engine.kind, job_id = %job.job_id, "worker pool closed");
                engine.release(&job.job_id, generation).await;
                return;
            };

            let ctx = JobContext {
                job,
                engine: engine.kind,
                fired_at: Utc::now(),
                scheduled_at,
            };
            engine.fire(&ctx).await;
            engine.release(&ctx.job.job_id, generation).await;
        });
    }

    /// Only the binding the fire was dispatched for is credited back.
    async fn release(&self, job_id: &JobId, generation: u64) {
        let mut bindings = self.bindings.write().await;
        if let Some(binding) = bindings.get_mut(job_id)
            && binding.generation == generation
        {
            binding.in_flight = binding.in_flight.saturating_sub(1);
        }
    }

    async fn fire(&self, ctx: &JobContext) {
        info!(
            engine = %self.kind,
            job_id = %ctx.job.job_id,
            out_of_band = ctx.is_out_of_band(),
            "firing job"
        );

        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();
        #[cfg(feature = "metrics")]
        {
            counter!(scheduler_metrics::FIRES_TOTAL, labels::ENGINE => self.kind.as_str())
                .increment(1);
            gauge!(engine_metrics::FIRES_IN_FLIGHT, labels::ENGINE => self.kind.as_str())
                .increment(1.0);
        }

        self.listener.on_fire_begin(ctx).await;
        let outcome = self.run_unit(ctx).await;
        self.listener.on_fire_end(ctx, &outcome).await;

        #[cfg(feature = "metrics")]
        {
            gauge!(engine_metrics::FIRES_IN_FLIGHT, labels::ENGINE => self.kind.as_str())
                .decrement(1.0);
            histogram!(scheduler_metrics::FIRE_DURATION_SECONDS, labels::ENGINE => self.kind.as_str())
                .record(started.elapsed().as_secs_f64());
            if outcome.execution_failed() {
                counter!(scheduler_metrics::FIRE_FAILURES_TOTAL, labels::ENGINE => self.kind.as_str())
                    .increment(1);
            }
        }

        match &outcome.failure {
            None => info!(
                engine = %self.kind,
                job_id = %ctx.job.job_id,
                has_result = outcome.result.is_some(),
                "job finished"
            ),
            Some(failure) => warn!(
                engine = %self.kind,
                job_id = %ctx.job.job_id,
                error = %failure,
                "job failed"
            ),
        }
    }

    /// Resolve and run the unit, turning every failure into an outcome.
    async fn run_unit(&self, ctx: &JobContext) -> FireOutcome {
        let unit = match self.resolver.resolve(&ctx.job) {
            Ok(unit) => unit,
            Err(e) => {
                error!(engine = %self.kind, job_id = %ctx.job.job_id, error = %e, "job resolution failed");
                return FireOutcome::failed(e.to_string());
            },
        };

        // Own task so a panicking body is contained to this fire.
        let body_ctx = ctx.clone();
        let body = tokio::spawn(async move { unit.execute(&body_ctx).await });
        match body.await {
            Ok(Ok(result)) => FireOutcome::completed(result),
            Ok(Err(e)) => FireOutcome::failed(e.to_string()),
            Err(join) if join.is_panic() => FireOutcome::failed("job panicked"),
            Err(_) => FireOutcome::failed("job cancelled"),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use {
        super::*,
        crate::{
            listener::RecordingListener,
            record::ExecutionRecords,
            registry_memory::InMemoryDaemonRegistry,
            resolver::Daemon,
            types::JobTarget,
        },
        async_trait::async_trait,
    };

    struct Counting {
        runs: Arc<AtomicUsize>,
        result: Option<&'static str>,
    }

    #[async_trait]
    impl Daemon for Counting {
        async fn run(&self) -> Result<Option<String>> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.map(str::to_string))
        }
    }

    struct Slow;

    #[async_trait]
    impl Daemon for Slow {
        async fn run(&self) -> Result<Option<String>> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(Some("slow".into()))
        }
    }

    /// Each run waits for one permit on `gate`.
    struct Gated {
        gate: Arc<Semaphore>,
        started: Arc<AtomicUsize>,
        finished: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Daemon for Gated {
        async fn run(&self) -> Result<Option<String>> {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.gate.acquire().await.unwrap().forget();
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    struct Panicking;

    #[async_trait]
    impl Daemon for Panicking {
        async fn run(&self) -> Result<Option<String>> {
            panic!("daemon blew up");
        }
    }

    struct Fixture {
        engine: Arc<TriggerEngine>,
        registry: Arc<InMemoryDaemonRegistry>,
        records: Arc<ExecutionRecords>,
    }

    fn fixture(kind: EngineKind) -> Fixture {
        let registry = Arc::new(InMemoryDaemonRegistry::new());
        let records = Arc::new(ExecutionRecords::new());
        let resolver = Arc::new(JobResolver::new(
            Arc::clone(&registry) as Arc<dyn crate::resolver::DaemonRegistry>
        ));
        let listener = Arc::new(RecordingListener::new(Arc::clone(&records), None));
        let engine = TriggerEngine::new(
            kind,
            EngineSettings {
                instance_name: "test".into(),
                thread_count: 2,
                idle_wait_ms: 1_000,
            },
            resolver,
            listener,
        );
        Fixture {
            engine,
            registry,
            records,
        }
    }

    fn daemon_job(id: &str) -> JobDetail {
        JobDetail {
            job_id: JobId::new(id).unwrap(),
            target: JobTarget::Daemon { entry_id: id.into() },
        }
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(3), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn start_and_shutdown() {
        let f = fixture(EngineKind::Local);
        assert!(!f.engine.is_running().await);
        f.engine.start().await.unwrap();
        f.engine.start().await.unwrap();
        assert!(f.engine.is_running().await);
        f.engine.shutdown().await;
        assert!(!f.engine.is_running().await);
        f.engine.shutdown().await;
    }

    #[tokio::test]
    async fn zero_workers_refuses_to_start() {
        let engine = TriggerEngine::new(
            EngineKind::Clustered,
            EngineSettings {
                thread_count: 0,
                ..EngineSettings::default()
            },
            Arc::new(JobResolver::new(Arc::new(InMemoryDaemonRegistry::new()))),
            Arc::new(RecordingListener::new(Arc::new(ExecutionRecords::new()), None)),
        );
        assert!(engine.start().await.is_err());
        assert!(!engine.is_running().await);
    }

    #[tokio::test]
    async fn stopped_engine_rejects_bindings() {
        let f = fixture(EngineKind::Local);
        let err = f
            .engine
            .schedule_job(daemon_job("J1"), &TriggerSpec::interval(60))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EngineNotRunning { .. }));
        assert!(!f.engine.exists("J1").await);
    }

    #[tokio::test]
    async fn second_registration_is_rejected() {
        let f = fixture(EngineKind::Local);
        f.engine.start().await.unwrap();
        f.engine
            .schedule_job(daemon_job("J1"), &TriggerSpec::interval_with_delay(60, 60))
            .await
            .unwrap();
        let err = f
            .engine
            .schedule_job(daemon_job("J1"), &TriggerSpec::cron("0 0 * * * *"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BindingExists { .. }));
        assert_eq!(f.engine.job_ids().await.len(), 1);
        f.engine.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_registration_leaves_one_binding() {
        let f = fixture(EngineKind::Local);
        f.engine.start().await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = Arc::clone(&f.engine);
            handles.push(tokio::spawn(async move {
                engine
                    .schedule_job(daemon_job("race"), &TriggerSpec::interval_with_delay(60, 60))
                    .await
                    .is_ok()
            }));
        }
        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(f.engine.job_ids().await.len(), 1);
        f.engine.shutdown().await;
    }

    #[tokio::test]
    async fn interval_binding_fires_repeatedly() {
        let f = fixture(EngineKind::Local);
        let runs = Arc::new(AtomicUsize::new(0));
        f.registry.insert(
            "J1",
            Arc::new(Counting {
                runs: Arc::clone(&runs),
                result: Some("done"),
            }),
        );
        f.engine.start().await.unwrap();
        f.engine
            .schedule_job(daemon_job("J1"), &TriggerSpec::interval(1))
            .await
            .unwrap();

        wait_for(|| runs.load(Ordering::SeqCst) >= 2).await;
        let rec = f.records.get("J1").unwrap();
        assert_eq!(rec.last_result.as_deref(), Some("done"));
        f.engine.shutdown().await;
    }

    #[tokio::test]
    async fn trigger_now_fires_out_of_band() {
        let f = fixture(EngineKind::Clustered);
        let runs = Arc::new(AtomicUsize::new(0));
        f.registry.insert(
            "J1",
            Arc::new(Counting {
                runs: Arc::clone(&runs),
                result: None,
            }),
        );
        f.engine.start().await.unwrap();
        f.engine
            .schedule_job(daemon_job("J1"), &TriggerSpec::interval_with_delay(3_600, 3_600))
            .await
            .unwrap();

        f.engine.trigger_now("J1").await.unwrap();
        wait_for(|| runs.load(Ordering::SeqCst) == 1).await;
        assert!(matches!(
            f.engine.trigger_now("missing").await,
            Err(Error::JobNotFound { .. })
        ));
        f.engine.shutdown().await;
    }

    #[tokio::test]
    async fn overlapping_occurrences_are_skipped() {
        let f = fixture(EngineKind::Local);
        f.registry.insert("slow", Arc::new(Slow));
        f.engine.start().await.unwrap();
        f.engine
            .schedule_job(daemon_job("slow"), &TriggerSpec::interval(1))
            .await
            .unwrap();

        let records = Arc::clone(&f.records);
        wait_for(|| records.get("slow").is_some_and(|r| r.in_progress)).await;
        // Only one fire can be in flight for the binding.
        let in_flight = f.engine.bindings.read().await["slow"].in_flight;
        assert_eq!(in_flight, 1);
        f.engine.shutdown().await;
    }

    #[tokio::test]
    async fn panicking_body_is_contained() {
        let f = fixture(EngineKind::Local);
        f.registry.insert("boom", Arc::new(Panicking));
        f.engine.start().await.unwrap();
        f.engine
            .schedule_job(daemon_job("boom"), &TriggerSpec::interval(3_600))
            .await
            .unwrap();

        let records = Arc::clone(&f.records);
        wait_for(|| records.get("boom").is_some_and(|r| !r.in_progress)).await;
        assert!(f.engine.is_running().await);
        assert!(f.engine.exists("boom").await);
        f.engine.shutdown().await;
    }

    #[tokio::test]
    async fn stale_fire_does_not_release_replacement_binding() {
        let f = fixture(EngineKind::Local);
        let gate = Arc::new(Semaphore::new(0));
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        f.registry.insert(
            "J1",
            Arc::new(Gated {
                gate: Arc::clone(&gate),
                started: Arc::clone(&started),
                finished: Arc::clone(&finished),
            }),
        );
        f.engine.start().await.unwrap();
        let later = TriggerSpec::interval_with_delay(3_600, 3_600);

        f.engine.schedule_job(daemon_job("J1"), &later).await.unwrap();
        f.engine.trigger_now("J1").await.unwrap();
        wait_for(|| started.load(Ordering::SeqCst) == 1).await;

        // Replace the binding while its first fire is still running.
        assert!(f.engine.delete("J1").await);
        f.engine.schedule_job(daemon_job("J1"), &later).await.unwrap();
        f.engine.trigger_now("J1").await.unwrap();
        wait_for(|| started.load(Ordering::SeqCst) == 2).await;

        // Let the older fire finish first.
        gate.add_permits(1);
        wait_for(|| finished.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.engine.bindings.read().await["J1"].in_flight, 1);

        gate.add_permits(1);
        wait_for(|| finished.load(Ordering::SeqCst) == 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.engine.bindings.read().await["J1"].in_flight, 0);
        f.engine.shutdown().await;
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let f = fixture(EngineKind::Local);
        f.engine.start().await.unwrap();
        f.engine
            .schedule_job(daemon_job("J1"), &TriggerSpec::interval_with_delay(60, 60))
            .await
            .unwrap();
        assert!(f.engine.delete("J1").await);
        assert!(!f.engine.delete("J1").await);
        assert!(!f.engine.exists("J1").await);
        f.engine.shutdown().await;
    }

    #[tokio::test]
    async fn status_reports_bindings() {
        let f = fixture(EngineKind::Local);
        f.engine.start().await.unwrap();
        f.engine
            .schedule_job(daemon_job("J1"), &TriggerSpec::interval_with_delay(60, 60))
            .await
            .unwrap();
        let status = f.engine.status().await;
        assert_eq!(status.state, EngineState::Running);
        assert_eq!(status.binding_count, 1);
        assert!(status.next_fire_at.is_some());
        assert_eq!(f.engine.next_fire_at("J1").await, status.next_fire_at);
        f.engine.shutdown().await;
    }
}
