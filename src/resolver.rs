//! Resolver contexts
//!
//! Every top-level `get` runs inside a fresh [`Resolver`]. Providers receive
//! it and resolve their own dependencies through it, so the resolver knows
//! the chain of keys it is currently building. That chain detects
//! same-stack cycles, feeds diagnostics, and decides which service a newly
//! resolved dependency belongs to.

use crate::container::Container;
use crate::guard;
use crate::provider::{Instance, ServiceType, canonical_type};
use crate::scope::Scope;
use crate::storage::TypeLookup;
use crate::{DiError, Result};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::{trace, warn};

/// Process-unique resolver context identifier.
///
/// Ids are handed out in increasing order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResolverId(u64);

impl ResolverId {
    /// Allocate the next id
    #[inline]
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value.
    #[inline]
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResolverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resolver-{}", self.0)
    }
}

/// One entry of the resolution stack
#[derive(Debug)]
struct Frame {
    /// `service:<name>` or `type:<type name>`
    key: String,
    /// Service name, for name frames
    service: Option<String>,
}

/// Resolution context handed to providers.
///
/// # Examples
///
/// ```rust
/// use service_container::{Container, RegisterOptions};
/// use std::sync::Arc;
///
/// struct Config { url: String }
/// struct Database { url: String }
///
/// let container = Container::new();
/// container
///     .register("config", |_| Ok(Arc::new(Config { url: "postgres://db".into() })), RegisterOptions::default())
///     .unwrap();
/// container
///     .register(
///         "database",
///         |resolver| {
///             let config = resolver.get::<Config>("config")?;
///             Ok(Arc::new(Database { url: config.url.clone() }))
///         },
///         RegisterOptions::default(),
///     )
///     .unwrap();
///
/// let db = container.get::<Database>("database").unwrap();
/// assert_eq!(db.url, "postgres://db");
/// ```
pub struct Resolver<'a> {
    container: &'a Container,
    scope: Option<&'a Scope>,
    id: ResolverId,
    frames: Mutex<Vec<Frame>>,
    requested: OnceCell<String>,
}

/// Pops its frame when the resolution it belongs to returns or unwinds
struct FrameGuard<'r> {
    frames: &'r Mutex<Vec<Frame>>,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.frames.lock().pop();
    }
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(container: &'a Container, scope: Option<&'a Scope>) -> Self {
        Self {
            container,
            scope,
            id: ResolverId::next(),
            frames: Mutex::new(Vec::new()),
            requested: OnceCell::new(),
        }
    }

    /// This context's id
    #[inline]
    pub fn id(&self) -> ResolverId {
        self.id
    }

    #[inline]
    pub(crate) fn container(&self) -> &'a Container {
        self.container
    }

    // =========================================================================
    // Public resolution surface
    // =========================================================================

    /// Resolve a service by name.
    ///
    /// Inside a scope the scope's overrides win.
    pub fn get<T: ?Sized + 'static>(&self, name: &str) -> Result<Arc<T>> {
        let instance = self.resolve_name(name)?;
        downcast::<T>(name, &instance)
    }

    /// Resolve a service by name, panicking on failure.
    #[track_caller]
    pub fn must_get<T: ?Sized + 'static>(&self, name: &str) -> Arc<T> {
        match self.get::<T>(name) {
            Ok(service) => service,
            Err(err) => panic!("{err}"),
        }
    }

    /// Resolve a service by its canonical type.
    pub fn get_by_type<T: ?Sized + 'static>(&self) -> Result<Arc<T>> {
        let service_type = canonical_type::<T>();
        let instance = self.resolve_type(service_type)?;
        downcast::<T>(service_type.name(), &instance)
    }

    /// Resolve a service by its canonical type, panicking on failure.
    #[track_caller]
    pub fn must_get_by_type<T: ?Sized + 'static>(&self) -> Arc<T> {
        match self.get_by_type::<T>() {
            Ok(service) => service,
            Err(err) => panic!("{err}"),
        }
    }

    /// Whether a service is registered (or overridden) under `name`
    pub fn has(&self, name: &str) -> bool {
        match self.scope {
            Some(scope) => scope.has(name),
            None => self.container.has(name),
        }
    }

    /// Whether anything is registered for the canonical type of `T`
    pub fn has_type<T: ?Sized + 'static>(&self) -> bool {
        match self.scope {
            Some(scope) => scope.has_type::<T>(),
            None => self.container.has_type::<T>(),
        }
    }

    // =========================================================================
    // Resolution engine
    // =========================================================================

    pub(crate) fn resolve_name(&self, name: &str) -> Result<Instance> {
        if name.is_empty() {
            return Err(DiError::EmptyName);
        }

        if let Some(scope) = self.scope {
            if let Some(instance) = scope.overlay_named(name)? {
                #[cfg(feature = "logging")]
                trace!(
                    target: "service_container",
                    service = name,
                    context_id = self.id.get(),
                    scope_id = %scope.id(),
                    "Service resolved from scope overlay"
                );
                return Ok(instance);
            }
        }

        let parent = self.current_service();
        let _frame = self.push(format!("service:{name}"), Some(name))?;
        guard::materialize(self, name, parent.as_deref())
    }

    pub(crate) fn resolve_type(&self, service_type: ServiceType) -> Result<Instance> {
        if let Some(scope) = self.scope {
            if let Some(instance) = scope.overlay_typed(&service_type)? {
                return Ok(instance);
            }
        }

        let parent = self.current_service();
        let key = format!("type:{}", service_type.name());
        let _frame = self.push(key.clone(), None)?;

        let lookup = self.container.inner.state.read().lookup_type(&service_type);
        match lookup {
            TypeLookup::Name(name) => self.resolve_name(&name),
            TypeLookup::Conflict(conflicts) => Err(DiError::TypeConflict {
                service_type: service_type.name(),
                conflicts,
            }),
            TypeLookup::Instance(instance) => {
                if let Some(parent) = parent {
                    self.container
                        .inner
                        .state
                        .write()
                        .record_dependency(&parent, &key);
                }
                Ok(instance)
            }
            TypeLookup::Missing => Err(DiError::TypeNotFound {
                service_type: service_type.name(),
            }),
        }
    }

    // =========================================================================
    // Stack bookkeeping
    // =========================================================================

    fn push(&self, key: String, service: Option<&str>) -> Result<FrameGuard<'_>> {
        let mut frames = self.frames.lock();

        if frames.iter().any(|frame| frame.key == key) {
            let mut chain: Vec<&str> = frames.iter().map(|frame| frame.key.as_str()).collect();
            chain.push(&key);
            let stack = chain.join(" -> ");

            #[cfg(feature = "logging")]
            warn!(
                target: "service_container",
                key = %key,
                context_id = self.id.get(),
                stack = %stack,
                "Circular service dependency detected on resolver stack"
            );

            return Err(DiError::CircularDependency { key, stack });
        }

        let _ = self.requested.set(key.clone());
        frames.push(Frame {
            key,
            service: service.map(str::to_string),
        });

        Ok(FrameGuard {
            frames: &self.frames,
        })
    }

    /// Nearest service name on the stack
    fn current_service(&self) -> Option<String> {
        self.frames
            .lock()
            .iter()
            .rev()
            .find_map(|frame| frame.service.clone())
    }

    /// Number of frames currently on the stack
    pub(crate) fn depth(&self) -> usize {
        self.frames.lock().len()
    }

    /// Render the stack as `a -> b -> c`
    pub(crate) fn stack(&self) -> String {
        self.frames
            .lock()
            .iter()
            .map(|frame| frame.key.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// The key of the outermost request made through this context
    pub(crate) fn requested(&self) -> String {
        self.requested.get().cloned().unwrap_or_default()
    }
}

impl fmt::Debug for Resolver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("id", &self.id)
            .field("scoped", &self.scope.is_some())
            .field("depth", &self.depth())
            .field("stack", &self.stack())
            .finish()
    }
}

fn downcast<T: ?Sized + 'static>(key: &str, instance: &Instance) -> Result<Arc<T>> {
    instance.downcast::<T>().ok_or_else(|| DiError::TypeMismatch {
        key: key.to_string(),
        expected: std::any::type_name::<T>(),
        actual: instance.service_type().name(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoxError, RegisterOptions};

    #[derive(Debug)]
    struct Leaf;

    #[derive(Debug)]
    struct Branch {
        leaf: Arc<Leaf>,
    }

    #[test]
    fn test_ids_increase() {
        let a = ResolverId::next();
        let b = ResolverId::next();
        assert!(b > a);
        assert_eq!(format!("{}", ResolverId::from_raw(3)), "resolver-3");
    }

    #[test]
    fn test_nested_resolution() {
        let container = Container::new();
        container
            .register("leaf", |_| Ok(Arc::new(Leaf)), RegisterOptions::default())
            .unwrap();
        container
            .register(
                "branch",
                |resolver| {
                    Ok(Arc::new(Branch {
                        leaf: resolver.get_by_type::<Leaf>()?,
                    }))
                },
                RegisterOptions::default(),
            )
            .unwrap();

        let branch = container.get::<Branch>("branch").unwrap();
        let leaf = container.get::<Leaf>("leaf").unwrap();
        assert!(Arc::ptr_eq(&branch.leaf, &leaf));
    }

    #[test]
    fn test_self_cycle_reports_stack() {
        let container = Container::new();
        container
            .register(
                "a",
                |resolver| -> std::result::Result<Arc<Leaf>, BoxError> {
                    resolver.get::<Leaf>("b")?;
                    Ok(Arc::new(Leaf))
                },
                RegisterOptions::new().without_type_registration(),
            )
            .unwrap();
        container
            .register(
                "b",
                |resolver| -> std::result::Result<Arc<Leaf>, BoxError> {
                    resolver.get::<Leaf>("a")?;
                    Ok(Arc::new(Leaf))
                },
                RegisterOptions::new().without_type_registration(),
            )
            .unwrap();

        let err = container.get::<Leaf>("a").unwrap_err();
        assert!(err.is_circular());
        match err.innermost() {
            DiError::CircularDependency { stack, .. } => {
                assert_eq!(stack, "service:a -> service:b -> service:a");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_type_mismatch() {
        let container = Container::new();
        container
            .register("leaf", |_| Ok(Arc::new(Leaf)), RegisterOptions::default())
            .unwrap();

        let err = container.get::<Branch>("leaf").unwrap_err();
        assert!(matches!(err, DiError::TypeMismatch { .. }));
    }

    #[test]
    fn test_resolver_reports_registration() {
        let container = Container::new();
        container
            .register("leaf", |_| Ok(Arc::new(Leaf)), RegisterOptions::default())
            .unwrap();

        let resolver = container.resolver();
        assert!(resolver.has("leaf"));
        assert!(resolver.has_type::<Leaf>());
        assert!(!resolver.has_type::<Branch>());
        assert_eq!(resolver.depth(), 0);
        assert_eq!(resolver.stack(), "");
    }

    #[test]
    fn test_stack_is_unwound_after_failure() {
        let container = Container::new();
        let resolver = container.resolver();

        assert!(resolver.get::<Leaf>("missing").is_err());
        assert_eq!(resolver.depth(), 0);
        assert_eq!(resolver.requested(), "service:missing");
    }
}
