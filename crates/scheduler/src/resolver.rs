//! Turns a fired job into something that can run.
//!
//! Resolution order:
//! 1. a daemon entry id on the job → the daemon from the [`DaemonRegistry`],
//!    wrapped as [`ExecutableUnit::Wrapped`];
//! 2. otherwise the native type name → the [`ComponentContainer`] first, then
//!    the default constructors registered in the [`JobFactory`];
//! 3. a component that is neither a job nor a daemon is a configuration
//!    error.
//!
//! Nothing is cached; every fire resolves afresh.

use std::{any::Any, collections::HashMap, fmt, sync::Arc};

use {async_trait::async_trait, tracing::debug};

use crate::{
    Error, Result,
    types::{JobContext, JobDetail, JobTarget},
};

/// A natively executable job.
#[async_trait]
pub trait Job: Send + Sync {
    async fn execute(&self, ctx: &JobContext) -> Result<Option<String>>;
}

/// An externally defined unit of periodic work.
#[async_trait]
pub trait Daemon: Send + Sync {
    async fn run(&self) -> Result<Option<String>>;
}

/// Lookup of daemons by entry id.
pub trait DaemonRegistry: Send + Sync {
    fn daemon(&self, entry_id: &str) -> Option<Arc<dyn Daemon>>;
}

/// Anything a container or constructor can hand back for a type name.
#[derive(Clone)]
pub enum Component {
    Job(Arc<dyn Job>),
    Daemon(Arc<dyn Daemon>),
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Job(_) => f.write_str("Component::Job"),
            Self::Daemon(_) => f.write_str("Component::Daemon"),
            Self::Opaque(_) => f.write_str("Component::Opaque"),
        }
    }
}

/// Externally managed components, e.g. job singletons owned by the host.
pub trait ComponentContainer: Send + Sync {
    fn lookup(&self, type_name: &str) -> Option<Component>;
}

type Constructor = Arc<dyn Fn() -> Result<Component> + Send + Sync>;

/// Default constructors by type name, used when the container has nothing.
#[derive(Clone, Default)]
pub struct JobFactory {
    constructors: HashMap<String, Constructor>,
}

impl JobFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job built with `Default::default()` on every fire.
    pub fn register_job<J>(&mut self, type_name: impl Into<String>) -> &mut Self
    where
        J: Job + Default + 'static,
    {
        self.register_with(type_name, || Ok(Component::Job(Arc::new(J::default()))))
    }

    /// Register a daemon type built with `Default::default()` on every fire.
    pub fn register_daemon<D>(&mut self, type_name: impl Into<String>) -> &mut Self
    where
        D: Daemon + Default + 'static,
    {
        self.register_with(type_name, || {
            Ok(Component::Daemon(Arc::new(D::default())))
        })
    }

    /// Register a fallible constructor.
    pub fn register_with<F>(&mut self, type_name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn() -> Result<Component> + Send + Sync + 'static,
    {
        self.constructors
            .insert(type_name.into(), Arc::new(constructor));
        self
    }

    pub fn construct(&self, type_name: &str) -> Option<Result<Component>> {
        self.constructors.get(type_name).map(|ctor| ctor())
    }
}

/// A resolved, ready-to-run unit.
#[derive(Clone)]
pub enum ExecutableUnit {
    Native(Arc<dyn Job>),
    Wrapped(Arc<dyn Daemon>),
}

impl ExecutableUnit {
    pub async fn execute(&self, ctx: &JobContext) -> Result<Option<String>> {
        match self {
            Self::Native(job) => job.execute(ctx).await,
            Self::Wrapped(daemon) => daemon.run().await,
        }
    }

    fn from_component(type_name: &str, component: Component) -> Result<Self> {
        match component {
            Component::Job(job) => Ok(Self::Native(job)),
            Component::Daemon(daemon) => Ok(Self::Wrapped(daemon)),
            Component::Opaque(_) => Err(Error::UnsupportedJobType {
                type_name: type_name.to_string(),
            }),
        }
    }
}

impl fmt::Debug for ExecutableUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(_) => f.write_str("ExecutableUnit::Native"),
            Self::Wrapped(_) => f.write_str("ExecutableUnit::Wrapped"),
        }
    }
}

pub struct JobResolver {
    daemons: Arc<dyn DaemonRegistry>,
    container: Option<Arc<dyn ComponentContainer>>,
    factory: JobFactory,
}

impl JobResolver {
    pub fn new(daemons: Arc<dyn DaemonRegistry>) -> Self {
        Self {
            daemons,
            container: None,
            factory: JobFactory::new(),
        }
    }

    #[must_use]
    pub fn with_container(mut self, container: Arc<dyn ComponentContainer>) -> Self {
        self.container = Some(container);
        self
    }

    #[must_use]
    pub fn with_factory(mut self, factory: JobFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn resolve(&self, job: &JobDetail) -> Result<ExecutableUnit> {
        match &job.target {
            JobTarget::Daemon { entry_id } => {
                let daemon = self
                    .daemons
                    .daemon(entry_id)
                    .ok_or_else(|| Error::DaemonNotFound {
                        entry_id: entry_id.clone(),
                    })?;
                Ok(ExecutableUnit::Wrapped(daemon))
            },
            JobTarget::Native { type_name } => {
                let component = self.instantiate(type_name)?;
                ExecutableUnit::from_component(type_name, component)
            },
        }
    }

    fn instantiate(&self, type_name: &str) -> Result<Component> {
        if let Some(component) = self
            .container
            .as_ref()
            .and_then(|container| container.lookup(type_name))
        {
            debug!(type_name, "job instance supplied by container");
            return Ok(component);
        }

        match self.factory.construct(type_name) {
            Some(Ok(component)) => Ok(component),
            Some(Err(e)) => Err(Error::instantiation(type_name, e.to_string())),
            None => Err(Error::instantiation(
                type_name,
                "no container component and no registered constructor",
            )),
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
            registry_memory::{InMemoryContainer, InMemoryDaemonRegistry},
            types::{EngineKind, JobId},
        },
    };

    struct Echo(&'static str);

    #[async_trait]
    impl Daemon for Echo {
        async fn run(&self) -> Result<Option<String>> {
            Ok(Some(self.0.to_string()))
        }
    }

    static BUILT: AtomicUsize = AtomicUsize::new(0);

    struct Report;

    impl Default for Report {
        fn default() -> Self {
            BUILT.fetch_add(1, Ordering::SeqCst);
            Report
        }
    }

    #[async_trait]
    impl Job for Report {
        async fn execute(&self, ctx: &JobContext) -> Result<Option<String>> {
            Ok(Some(format!("report for {}", ctx.job.job_id)))
        }
    }

    fn ctx(job: &JobDetail) -> JobContext {
        JobContext {
            job: job.clone(),
            engine: EngineKind::Local,
            fired_at: chrono::Utc::now(),
            scheduled_at: None,
        }
    }

    fn daemon_job(entry_id: &str) -> JobDetail {
        JobDetail {
            job_id: JobId::new(entry_id).unwrap(),
            target: JobTarget::Daemon {
                entry_id: entry_id.into(),
            },
        }
    }

    fn native_job(type_name: &str) -> JobDetail {
        JobDetail {
            job_id: JobId::new("native").unwrap(),
            target: JobTarget::Native {
                type_name: type_name.into(),
            },
        }
    }

    #[tokio::test]
    async fn daemon_entry_resolves_to_wrapped_unit() {
        let registry = Arc::new(InMemoryDaemonRegistry::new());
        registry.insert("mail", Arc::new(Echo("sent")));
        let resolver = JobResolver::new(registry);

        let job = daemon_job("mail");
        let unit = resolver.resolve(&job).unwrap();
        assert!(matches!(unit, ExecutableUnit::Wrapped(_)));
        assert_eq!(unit.execute(&ctx(&job)).await.unwrap().as_deref(), Some("sent"));
    }

    #[test]
    fn unknown_daemon_is_an_error() {
        let resolver = JobResolver::new(Arc::new(InMemoryDaemonRegistry::new()));
        assert!(matches!(
            resolver.resolve(&daemon_job("ghost")),
            Err(Error::DaemonNotFound { .. })
        ));
    }

    #[test]
    fn daemon_replacement_is_seen_on_next_resolve() {
        let registry = Arc::new(InMemoryDaemonRegistry::new());
        registry.insert("mail", Arc::new(Echo("v1")));
        let resolver = JobResolver::new(Arc::clone(&registry) as Arc<dyn DaemonRegistry>);
        let job = daemon_job("mail");
        resolver.resolve(&job).unwrap();

        registry.remove("mail");
        assert!(resolver.resolve(&job).is_err());
    }

    #[tokio::test]
    async fn container_wins_over_factory() {
        let container = Arc::new(InMemoryContainer::new());
        container.insert("report", Component::Daemon(Arc::new(Echo("managed"))));
        let mut factory = JobFactory::new();
        factory.register_job::<Report>("report");

        let resolver = JobResolver::new(Arc::new(InMemoryDaemonRegistry::new()))
            .with_container(container)
            .with_factory(factory);

        let job = native_job("report");
        let unit = resolver.resolve(&job).unwrap();
        assert_eq!(
            unit.execute(&ctx(&job)).await.unwrap().as_deref(),
            Some("managed")
        );
    }

    #[tokio::test]
    async fn factory_constructs_on_every_resolve() {
        let mut factory = JobFactory::new();
        factory.register_job::<Report>("report");
        let resolver =
            JobResolver::new(Arc::new(InMemoryDaemonRegistry::new())).with_factory(factory);

        let before = BUILT.load(Ordering::SeqCst);
        let job = native_job("report");
        let unit = resolver.resolve(&job).unwrap();
        resolver.resolve(&job).unwrap();
        assert!(BUILT.load(Ordering::SeqCst) >= before + 2);

        assert!(matches!(unit, ExecutableUnit::Native(_)));
        assert_eq!(
            unit.execute(&ctx(&job)).await.unwrap().as_deref(),
            Some("report for native")
        );
    }

    #[test]
    fn opaque_component_is_unsupported() {
        let mut factory = JobFactory::new();
        factory.register_with("settings", || Ok(Component::Opaque(Arc::new(42_u32))));
        let resolver =
            JobResolver::new(Arc::new(InMemoryDaemonRegistry::new())).with_factory(factory);

        let err = resolver.resolve(&native_job("settings")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedJobType { ref type_name } if type_name == "settings"));
    }

    #[test]
    fn failing_or_missing_constructor() {
        let mut factory = JobFactory::new();
        factory.register_with("broken", || Err(Error::message("missing credentials")));
        let resolver =
            JobResolver::new(Arc::new(InMemoryDaemonRegistry::new())).with_factory(factory);

        let err = resolver.resolve(&native_job("broken")).unwrap_err();
        assert!(err.to_string().contains("missing credentials"));
        assert!(matches!(
            resolver.resolve(&native_job("nowhere")),
            Err(Error::Instantiation { .. })
        ));
    }
}
