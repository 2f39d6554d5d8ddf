//! Scoped overlays
//!
//! A [`Scope`] sits in front of a container with a private set of overrides.
//! Lookups hit the overlay first and fall through to the container; results
//! from the container are never copied into the overlay.
//!
//! A service first constructed through a scope is still a container
//! singleton: its provider saw the scope's overrides, and every later
//! lookup, scoped or not, shares that instance.

use crate::container::{Container, PROTECTED_PREFIX};
use crate::provider::{Instance, IntoInstance, ServiceType, canonical_type};
use crate::resolver::Resolver;
use crate::{DiError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::debug;

/// Unique scope identifier.
///
/// Each scope gets a unique ID for tracking and debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Generate a new unique scope ID.
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

/// A container view with private overrides.
///
/// Useful for request-scoped values: the request overrides what it needs
/// and everything else comes from the shared container.
///
/// # Examples
///
/// ```rust
/// use service_container::{Container, RegisterOptions};
/// use std::sync::Arc;
///
/// struct RequestContext {
///     request_id: String,
/// }
///
/// let root = Container::new();
/// root.register(
///     "request",
///     |_| Ok(Arc::new(RequestContext { request_id: "none".into() })),
///     RegisterOptions::default(),
/// )
/// .unwrap();
///
/// let scope = root.new_scope();
/// scope
///     .override_instance("request", Arc::new(RequestContext { request_id: "req-123".into() }))
///     .unwrap();
///
/// assert_eq!(scope.get::<RequestContext>("request").unwrap().request_id, "req-123");
/// assert_eq!(root.get::<RequestContext>("request").unwrap().request_id, "none");
/// ```
pub struct Scope {
    container: Container,
    id: ScopeId,
    named: DashMap<String, Instance, RandomState>,
    typed: DashMap<ServiceType, Instance, RandomState>,
    closed: AtomicBool,
}

impl Scope {
    pub(crate) fn new(container: Container) -> Self {
        let id = ScopeId::new();

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            scope_id = id.id(),
            "Creating new scope"
        );

        Self {
            container,
            id,
            named: DashMap::with_hasher(RandomState::new()),
            typed: DashMap::with_hasher(RandomState::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Get the scope identifier.
    #[inline]
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// The container this scope falls through to
    #[inline]
    pub fn container(&self) -> &Container {
        &self.container
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve a service by name, overrides first.
    ///
    /// Providers invoked on a miss resolve their own dependencies through
    /// this scope too.
    pub fn get<T: ?Sized + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.ensure_open()?;
        self.resolver().get::<T>(name)
    }

    /// Resolve a service by name, panicking on failure.
    #[track_caller]
    pub fn must_get<T: ?Sized + 'static>(&self, name: &str) -> Arc<T> {
        match self.get::<T>(name) {
            Ok(service) => service,
            Err(err) => panic!("{err}"),
        }
    }

    /// Resolve a service by canonical type, overrides first.
    pub fn get_by_type<T: ?Sized + 'static>(&self) -> Result<Arc<T>> {
        self.ensure_open()?;
        self.resolver().get_by_type::<T>()
    }

    /// Resolve a service by canonical type, panicking on failure.
    #[track_caller]
    pub fn must_get_by_type<T: ?Sized + 'static>(&self) -> Arc<T> {
        match self.get_by_type::<T>() {
            Ok(service) => service,
            Err(err) => panic!("{err}"),
        }
    }

    /// A resolver context that sees this scope's overrides
    #[inline]
    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.container, Some(self))
    }

    /// Whether `name` is overridden here or known to the container.
    ///
    /// Always `false` once the scope is closed.
    pub fn has(&self, name: &str) -> bool {
        if name.is_empty() || self.is_closed() {
            return false;
        }

        self.named.contains_key(name) || self.container.has(name)
    }

    /// Whether the canonical type of `T` is overridden here or known to the container.
    pub fn has_type<T: ?Sized + 'static>(&self) -> bool {
        if self.is_closed() {
            return false;
        }

        self.typed.contains_key(&canonical_type::<T>()) || self.container.has_type::<T>()
    }

    // =========================================================================
    // Overrides
    // =========================================================================

    /// Override a service in this scope only.
    ///
    /// Names starting with [`PROTECTED_PREFIX`] are refused. The name does
    /// not need to be registered in the container.
    pub fn override_instance<V: IntoInstance>(&self, name: &str, value: V) -> Result<()> {
        if name.starts_with(PROTECTED_PREFIX) {
            return Err(DiError::protected(name));
        }

        self.override_protected_instance(name, value)
    }

    /// Override a service in this scope only, protected or not.
    ///
    /// The value's canonical type, and every type the container maps to
    /// `name`, resolve to it inside this scope.
    pub fn override_protected_instance<V: IntoInstance>(&self, name: &str, value: V) -> Result<()> {
        if name.is_empty() {
            return Err(DiError::EmptyName);
        }

        let Some(instance) = value.into_instance() else {
            return Err(DiError::EmptyOverride {
                name: name.to_string(),
            });
        };

        self.ensure_open()?;

        let mapped = self.container.inner.state.read().types_for(name);
        for service_type in mapped {
            self.typed.insert(service_type, instance.clone());
        }
        self.typed.insert(instance.service_type(), instance.clone());
        self.named.insert(name.to_string(), instance);

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            scope_id = self.id.id(),
            service = name,
            "Overrode service instance in scope"
        );

        Ok(())
    }

    /// Scoped override, panicking on failure.
    #[track_caller]
    pub fn must_override_instance<V: IntoInstance>(&self, name: &str, value: V) {
        if let Err(err) = self.override_instance(name, value) {
            panic!("{err}");
        }
    }

    /// Scoped protected override, panicking on failure.
    #[track_caller]
    pub fn must_override_protected_instance<V: IntoInstance>(&self, name: &str, value: V) {
        if let Err(err) = self.override_protected_instance(name, value) {
            panic!("{err}");
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Drop every override. Later use of the scope fails with [`DiError::ScopeClosed`].
    ///
    /// Overrides are released, not closed: their close handlers belong to
    /// whoever created them.
    pub fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.named.clear();
        self.typed.clear();

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            scope_id = self.id.id(),
            "Closed scope"
        );

        Ok(())
    }

    /// Whether `close` has been called
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DiError::ScopeClosed);
        }
        Ok(())
    }

    pub(crate) fn overlay_named(&self, name: &str) -> Result<Option<Instance>> {
        self.ensure_open()?;
        Ok(self.named.get(name).map(|entry| entry.value().clone()))
    }

    pub(crate) fn overlay_typed(&self, service_type: &ServiceType) -> Result<Option<Instance>> {
        self.ensure_open()?;
        Ok(self.typed.get(service_type).map(|entry| entry.value().clone()))
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("overrides", &self.named.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegisterOptions;

    struct Settings {
        value: &'static str,
    }

    struct Handler {
        settings: Arc<Settings>,
    }

    fn container() -> Container {
        let container = Container::new();
        container
            .register(
                "settings",
                |_| Ok(Arc::new(Settings { value: "container" })),
                RegisterOptions::default(),
            )
            .unwrap();
        container
            .register(
                "handler",
                |resolver| {
                    Ok(Arc::new(Handler {
                        settings: resolver.get::<Settings>("settings")?,
                    }))
                },
                RegisterOptions::default(),
            )
            .unwrap();
        container
    }

    #[test]
    fn test_override_is_isolated() {
        let container = container();
        let scope = container.new_scope();
        scope
            .override_instance("settings", Arc::new(Settings { value: "scope" }))
            .unwrap();

        assert_eq!(scope.get::<Settings>("settings").unwrap().value, "scope");
        assert_eq!(scope.get_by_type::<Settings>().unwrap().value, "scope");
        assert_eq!(container.get::<Settings>("settings").unwrap().value, "container");
    }

    #[test]
    fn test_falls_through_without_caching() {
        let container = container();
        let scope = container.new_scope();

        let from_scope = scope.get::<Settings>("settings").unwrap();
        let from_container = container.get::<Settings>("settings").unwrap();
        assert!(Arc::ptr_eq(&from_scope, &from_container));
        assert!(scope.named.is_empty());
    }

    #[test]
    fn test_providers_see_scope_overrides() {
        let container = container();
        let scope = container.new_scope();
        scope
            .override_instance("settings", Arc::new(Settings { value: "scope" }))
            .unwrap();

        let handler = scope.get::<Handler>("handler").unwrap();
        assert_eq!(handler.settings.value, "scope");

        // The constructed handler is the container's singleton
        let shared = container.get::<Handler>("handler").unwrap();
        assert!(Arc::ptr_eq(&handler, &shared));
    }

    #[test]
    fn test_protected_names() {
        let container = Container::new();
        let scope = container.new_scope();

        let err = scope
            .override_instance("service.router", Arc::new(Settings { value: "x" }))
            .unwrap_err();
        assert!(matches!(err, DiError::Protected { .. }));

        scope
            .override_protected_instance("service.router", Arc::new(Settings { value: "x" }))
            .unwrap();
        assert!(scope.has("service.router"));
        assert!(!container.has("service.router"));
    }

    #[test]
    fn test_protected_override_rewrites_mapped_types() {
        struct Alias;

        let container = container();
        let scope = container.new_scope();

        // Value of an unrelated type still answers for the type mapped to the name
        scope
            .override_protected_instance("settings", Arc::new(Alias))
            .unwrap();

        assert!(scope.get_by_type::<Alias>().is_ok());
        assert!(matches!(
            scope.get_by_type::<Settings>(),
            Err(DiError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_override_rejected() {
        let scope = Container::new().new_scope();
        let err = scope
            .override_instance("settings", None::<Arc<Settings>>)
            .unwrap_err();
        assert!(matches!(err, DiError::EmptyOverride { .. }));
    }

    #[test]
    fn test_closed_scope() {
        let container = container();
        let scope = container.new_scope();
        scope
            .override_instance("settings", Arc::new(Settings { value: "scope" }))
            .unwrap();
        scope.close().unwrap();

        assert!(scope.is_closed());
        assert!(!scope.has("settings"));
        assert!(!scope.has_type::<Settings>());
        assert!(matches!(scope.get::<Settings>("settings"), Err(DiError::ScopeClosed)));
        assert!(matches!(
            scope.override_instance("settings", Arc::new(Settings { value: "late" })),
            Err(DiError::ScopeClosed)
        ));
        assert_eq!(container.get::<Settings>("settings").unwrap().value, "container");
    }

    #[test]
    fn test_scope_ids_unique() {
        let s1 = ScopeId::new();
        let s2 = ScopeId::new();

        assert_ne!(s1.id(), s2.id());
        assert!(format!("{s1}").starts_with("scope-"));
    }
}
