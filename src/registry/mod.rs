//! Entity registry: builds every model once and publishes the result to all requests.
//!
//! The first [`Registry::initialize`] call spawns the build; callers arriving while it runs wait
//! on the same watch channel, so there is never more than one build in flight. Each waiter is
//! bounded by the init timeout; a timed-out waiter gives up without cancelling the build.

mod build;

pub use build::build;

use crate::config::{DeclarationMap, DeclarationSource, EntityDeclaration};
use crate::access::PermissionMap;
use crate::error::{AppError, RegistryError};
use crate::store::{DocumentStore, Model, ModelMap, SchemaDefinition};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// One published registry generation. Immutable once built.
pub struct Initialized {
    pub declarations: DeclarationMap,
    pub models: ModelMap,
    pub permissions: PermissionMap,
}

impl Initialized {
    pub fn model(&self, entity: &str) -> Option<&Arc<Model>> {
        self.models.get(entity)
    }

    pub fn declaration(&self, entity: &str) -> Option<&Arc<EntityDeclaration>> {
        self.declarations.get(entity)
    }
}

/// Build-time callbacks, invoked in order during a single build.
#[async_trait]
pub trait LifecycleListener: Send + Sync {
    /// Each entity's record definition, before its model exists. May add fields or observers.
    fn schema_created(&self, _schema: &mut SchemaDefinition, _declaration: &EntityDeclaration) {}

    fn model_created(&self, _model: &Model, _declaration: &EntityDeclaration) {}

    /// Once, with every model built, before the generation is published.
    async fn entity_map_ready(&self, _entities: &Initialized) -> Result<(), RegistryError> {
        Ok(())
    }
}

/// Listener that ignores every event.
pub struct NoopListener;

impl LifecycleListener for NoopListener {}

#[derive(Clone)]
enum Phase {
    Idle,
    Building,
    Ready(Arc<Initialized>),
    Failed(Arc<RegistryError>),
}

struct Inner {
    source: DeclarationSource,
    store: Arc<dyn DocumentStore>,
    listener: Arc<dyn LifecycleListener>,
    init_timeout: Duration,
    phase: watch::Sender<Phase>,
}

#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    pub fn new(
        source: DeclarationSource,
        store: Arc<dyn DocumentStore>,
        listener: Arc<dyn LifecycleListener>,
        init_timeout: Duration,
    ) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        Registry {
            inner: Arc::new(Inner {
                source,
                store,
                listener,
                init_timeout,
                phase,
            }),
        }
    }

    /// The published generation, building it first if needed.
    pub async fn initialize(&self) -> Result<Arc<Initialized>, AppError> {
        let mut rx = self.inner.phase.subscribe();
        let start = self.inner.phase.send_if_modified(|p| {
            if matches!(p, Phase::Idle) {
                *p = Phase::Building;
                true
            } else {
                false
            }
        });
        if start {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                tracing::info!("entity registry build started");
                let outcome = match build(&inner.source, inner.store.clone(), inner.listener.as_ref()).await {
                    Ok(built) => {
                        tracing::info!(entities = built.declarations.len(), "entity registry ready");
                        Phase::Ready(Arc::new(built))
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "entity registry build failed");
                        Phase::Failed(Arc::new(e))
                    }
                };
                inner.phase.send_replace(outcome);
            });
        }

        let waited = tokio::time::timeout(
            self.inner.init_timeout,
            rx.wait_for(|p| matches!(p, Phase::Ready(_) | Phase::Failed(_))),
        )
        .await;
        let phase = match waited {
            Ok(Ok(phase)) => phase.clone(),
            Ok(Err(_)) | Err(_) => {
                let ms = self.inner.init_timeout.as_millis() as u64;
                tracing::warn!(timeout_ms = ms, "waited too long for the entity registry");
                return Err(AppError::InitializationTimeout(ms));
            }
        };
        match phase {
            Phase::Ready(built) => Ok(built),
            Phase::Failed(e) => Err(AppError::Registry(e)),
            Phase::Idle | Phase::Building => Err(AppError::InitializationTimeout(self.inner.init_timeout.as_millis() as u64)),
        }
    }

    /// The published generation, if a build has completed successfully.
    pub fn current(&self) -> Option<Arc<Initialized>> {
        match &*self.inner.phase.borrow() {
            Phase::Ready(built) => Some(built.clone()),
            _ => None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.current().is_some()
    }

    /// Drop the published generation so the next `initialize` rebuilds. Refused mid-build.
    pub fn reset(&self) -> Result<(), RegistryError> {
        let mut busy = false;
        self.inner.phase.send_if_modified(|p| match p {
            Phase::Building => {
                busy = true;
                false
            }
            Phase::Idle => false,
            _ => {
                *p = Phase::Idle;
                true
            }
        });
        if busy {
            return Err(RegistryError::Busy);
        }
        tracing::info!("entity registry reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        builds: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl LifecycleListener for Counting {
        async fn entity_map_ready(&self, _entities: &Initialized) -> Result<(), RegistryError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    fn registry(listener: Arc<Counting>, timeout: Duration) -> Registry {
        let source = DeclarationSource::default()
            .with_declaration(EntityDeclaration::new("user"))
            .with_declaration(EntityDeclaration::new("provider").discriminate("user"));
        Registry::new(source, Arc::new(MemoryStore::new()), listener, timeout)
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_build() {
        let listener = Arc::new(Counting {
            builds: AtomicUsize::new(0),
            delay: Duration::from_millis(20),
        });
        let reg = registry(listener.clone(), Duration::from_secs(5));
        let (a, b, c) = tokio::join!(reg.initialize(), reg.initialize(), reg.initialize());
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert!(Arc::ptr_eq(&a, &b) && Arc::ptr_eq(&b, &c));
        assert_eq!(listener.builds.load(Ordering::SeqCst), 1);
        assert!(a.model("provider").is_some());
    }

    #[tokio::test]
    async fn timed_out_waiters_do_not_cancel_the_build() {
        let listener = Arc::new(Counting {
            builds: AtomicUsize::new(0),
            delay: Duration::from_millis(200),
        });
        let reg = registry(listener.clone(), Duration::from_millis(20));
        assert!(matches!(reg.initialize().await, Err(AppError::InitializationTimeout(20))));
        assert!(matches!(reg.reset(), Err(RegistryError::Busy)));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(reg.is_initialized());
        assert_eq!(listener.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reset_triggers_a_rebuild() {
        let listener = Arc::new(Counting {
            builds: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        let reg = registry(listener.clone(), Duration::from_secs(5));
        reg.initialize().await.unwrap();
        reg.reset().unwrap();
        assert!(!reg.is_initialized());
        reg.initialize().await.unwrap();
        assert_eq!(listener.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_builds_are_reported_to_every_caller() {
        let source = DeclarationSource::default()
            .with_declaration(EntityDeclaration::new("a").extend("b"))
            .with_declaration(EntityDeclaration::new("b").extend("a"));
        let reg = Registry::new(source, Arc::new(MemoryStore::new()), Arc::new(NoopListener), Duration::from_secs(5));
        for _ in 0..2 {
            match reg.initialize().await {
                Err(AppError::Registry(e)) => assert!(matches!(*e, RegistryError::CyclicDependency(_))),
                other => panic!("expected cyclic dependency, got {:?}", other.map(|_| ())),
            }
        }
    }
}
