//! Scoped service registry
//!
//! A [`ServiceRegistry`] is one scope: services are registered as factories
//! under typed [`ServiceKey`]s, built on first [`resolve`](ServiceRegistry::resolve)
//! and memoized for the rest of the scope. Tearing the scope down releases
//! every constructed service exactly once, most recently constructed first,
//! after which the registry rejects all further use.
//!
//! ```
//! use std::sync::Arc;
//! use origin_cache::registry::{ServiceKey, ServiceRegistry};
//!
//! static GREETING: ServiceKey<Arc<String>> = ServiceKey::new("greeting");
//!
//! let registry = ServiceRegistry::new();
//! registry.register(&GREETING, |_| Ok(Arc::new("ciao!".to_string()))).unwrap();
//!
//! let greeting = registry.run(|scope| scope.resolve(&GREETING)).unwrap();
//! assert_eq!(greeting.as_str(), "ciao!");
//! assert!(!registry.is_open());
//! ```

mod key;

pub use key::ServiceKey;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, error, info};

use crate::error::{Error, Result};

type Instance = Box<dyn Any + Send + Sync>;
type Factory = Box<dyn Fn(&ServiceRegistry) -> Result<Instance> + Send + Sync>;
type Closer = Box<dyn FnOnce(Instance) + Send>;

/// Lifecycle phase of a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Registrations and resolutions allowed
    Open,
    /// Teardown in progress
    Closing,
    /// Terminal
    Closed,
}

/// A constructed service together with its construction order
struct Built {
    sequence: u64,
    instance: Instance,
}

/// One registered service
struct Slot {
    name: &'static str,
    factory: Factory,
    closer: Mutex<Option<Closer>>,
    instance: Mutex<Option<Built>>,
}

/// Container of lazily constructed, scope-lived services
pub struct ServiceRegistry {
    phase: RwLock<Phase>,
    slots: RwLock<HashMap<&'static str, Arc<Slot>>>,
    sequence: AtomicU64,
}

impl ServiceRegistry {
    /// Creates an empty, open scope
    pub fn new() -> Self {
        Self {
            phase: RwLock::new(Phase::Open),
            slots: RwLock::default(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_open(&self) -> bool {
        self.phase() == Phase::Open
    }

    fn ensure_open(&self, operation: &str, name: &str) -> Result<()> {
        match self.phase() {
            Phase::Open => Ok(()),
            phase => Err(Error::Lifecycle(format!(
                "cannot {operation} service '{name}': scope is {phase:?}"
            ))),
        }
    }

    /// Registers a service built by `factory` on first resolution
    ///
    /// The factory receives the registry so it can resolve the services it
    /// depends on. Fails with a configuration error if the key is taken.
    pub fn register<T, F>(&self, key: &ServiceKey<T>, factory: F) -> Result<&Self>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&ServiceRegistry) -> Result<T> + Send + Sync + 'static,
    {
        self.insert(key, factory, None)
    }

    /// Registers a service with a release action run at scope teardown
    ///
    /// `closer` receives the constructed instance and runs once, only if the
    /// service was actually built.
    pub fn register_with_closer<T, F, C>(
        &self,
        key: &ServiceKey<T>,
        factory: F,
        closer: C,
    ) -> Result<&Self>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&ServiceRegistry) -> Result<T> + Send + Sync + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        let closer: Closer = Box::new(move |instance: Instance| {
            if let Ok(instance) = instance.downcast::<T>() {
                closer(*instance);
            }
        });
        self.insert(key, factory, Some(closer))
    }

    fn insert<T, F>(&self, key: &ServiceKey<T>, factory: F, closer: Option<Closer>) -> Result<&Self>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&ServiceRegistry) -> Result<T> + Send + Sync + 'static,
    {
        self.ensure_open("register", key.name())?;

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.contains_key(key.name()) {
            return Err(Error::Configuration(format!(
                "service '{}' is already registered",
                key.name()
            )));
        }

        let factory: Factory = Box::new(move |registry: &ServiceRegistry| {
            factory(registry).map(|instance| Box::new(instance) as Instance)
        });
        slots.insert(
            key.name(),
            Arc::new(Slot {
                name: key.name(),
                factory,
                closer: Mutex::new(closer),
                instance: Mutex::new(None),
            }),
        );
        debug!(service = key.name(), "service registered");
        Ok(self)
    }

    /// Returns the scope's instance of a service, building it on first use
    ///
    /// The factory runs at most once per scope, even when several threads
    /// resolve the key at the same time. A factory error is returned to the
    /// caller and not memoized. Factories must not depend on each other
    /// cyclically.
    pub fn resolve<T>(&self, key: &ServiceKey<T>) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.ensure_open("resolve", key.name())?;

        let slot = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key.name())
            .cloned()
            .ok_or_else(|| {
                Error::Configuration(format!("service '{}' is not registered", key.name()))
            })?;

        let mut built = slot.instance.lock().unwrap_or_else(PoisonError::into_inner);
        // Teardown takes every slot lock after leaving Open, so this check
        // keeps instances from being built behind its back.
        self.ensure_open("resolve", key.name())?;

        if built.is_none() {
            let instance = (slot.factory)(self)?;
            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
            debug!(service = slot.name, sequence, "service constructed");
            *built = Some(Built { sequence, instance });
        }

        built
            .as_ref()
            .and_then(|built| built.instance.downcast_ref::<T>())
            .cloned()
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "service '{}' was resolved with a mismatched type",
                    key.name()
                ))
            })
    }

    /// Runs `task` in this scope, then tears the scope down
    ///
    /// Teardown happens however `task` exits: by returning, by returning an
    /// error, or by panicking.
    pub fn run<R, F>(&self, task: F) -> Result<R>
    where
        F: FnOnce(&ServiceRegistry) -> Result<R>,
    {
        let phase = self.phase();
        if phase != Phase::Open {
            return Err(Error::Lifecycle(format!("cannot run task: scope is {phase:?}")));
        }

        struct Teardown<'a>(&'a ServiceRegistry);

        impl Drop for Teardown<'_> {
            fn drop(&mut self) {
                let _ = self.0.close();
            }
        }

        let _teardown = Teardown(self);
        task(self)
    }

    /// Tears the scope down, releasing every constructed service
    ///
    /// Closers run in reverse construction order. A panicking closer does not
    /// stop the others: the scope still ends up closed and the first panic is
    /// resumed afterwards, unless the thread is already unwinding. Fails with
    /// a lifecycle error if the scope is not open.
    pub fn close(&self) -> Result<()> {
        {
            let mut phase = self.phase.write().unwrap_or_else(PoisonError::into_inner);
            if *phase != Phase::Open {
                return Err(Error::Lifecycle(format!("scope is already {:?}", *phase)));
            }
            *phase = Phase::Closing;
        }

        let slots: Vec<Arc<Slot>> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut releases = Vec::new();
        for slot in &slots {
            let built = slot
                .instance
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(built) = built {
                let closer = slot.closer.lock().unwrap_or_else(PoisonError::into_inner).take();
                releases.push((built.sequence, slot.name, built.instance, closer));
            }
        }
        releases.sort_by(|a, b| b.0.cmp(&a.0));

        let released = releases.len();
        let mut first_panic = None;
        for (_, name, instance, closer) in releases {
            let Some(closer) = closer else {
                debug!(service = name, "service released");
                continue;
            };
            match panic::catch_unwind(AssertUnwindSafe(|| closer(instance))) {
                Ok(()) => debug!(service = name, "service released"),
                Err(payload) => {
                    error!(service = name, "service closer panicked");
                    first_panic.get_or_insert(payload);
                }
            }
        }

        *self.phase.write().unwrap_or_else(PoisonError::into_inner) = Phase::Closed;
        info!(released, "scope closed");

        if let Some(payload) = first_panic {
            if !std::thread::panicking() {
                panic::resume_unwind(payload);
            }
        }
        Ok(())
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let mut services: Vec<_> = slots.keys().collect();
        services.sort();
        f.debug_struct("ServiceRegistry")
            .field("phase", &self.phase())
            .field("services", &services)
            .finish()
    }
}

impl Drop for ServiceRegistry {
    fn drop(&mut self) {
        if self.is_open() {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    static NUMBER: ServiceKey<Arc<u32>> = ServiceKey::new("number");
    static LABEL: ServiceKey<Arc<String>> = ServiceKey::new("label");

    #[test]
    fn test_factory_is_lazy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ServiceRegistry::new();
        let counter = calls.clone();
        registry
            .register(&NUMBER, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(7))
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0, "Registration must not construct");
        registry.resolve(&NUMBER).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_factory_can_resolve_dependencies() {
        let registry = ServiceRegistry::new();
        registry
            .register(&NUMBER, |_| Ok(Arc::new(7)))
            .unwrap()
            .register(&LABEL, |scope| {
                let number = scope.resolve(&NUMBER)?;
                Ok(Arc::new(format!("n={number}")))
            })
            .unwrap();

        assert_eq!(registry.resolve(&LABEL).unwrap().as_str(), "n=7");
    }

    #[test]
    fn test_failed_construction_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ServiceRegistry::new();
        let counter = calls.clone();
        registry
            .register(&NUMBER, move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::Configuration("not yet".to_string()))
                } else {
                    Ok(Arc::new(1))
                }
            })
            .unwrap();

        assert!(registry.resolve(&NUMBER).is_err());
        assert_eq!(*registry.resolve(&NUMBER).unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_mismatched_key_type_is_configuration_error() {
        static WRONG: ServiceKey<Arc<String>> = ServiceKey::new("number");
        let registry = ServiceRegistry::new();
        registry.register(&NUMBER, |_| Ok(Arc::new(7))).unwrap();

        let err = registry.resolve(&WRONG).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_close_twice_is_lifecycle_error() {
        let registry = ServiceRegistry::new();
        registry.close().unwrap();

        assert_eq!(registry.phase(), Phase::Closed);
        assert!(matches!(registry.close(), Err(Error::Lifecycle(_))));
        assert!(matches!(
            registry.register(&NUMBER, |_| Ok(Arc::new(1))),
            Err(Error::Lifecycle(_))
        ));
    }

    #[test]
    fn test_debug_lists_services() {
        let registry = ServiceRegistry::new();
        registry.register(&NUMBER, |_| Ok(Arc::new(7))).unwrap();

        let debug = format!("{registry:?}");
        assert!(debug.contains("number"));
        assert!(debug.contains("Open"));
    }
}
