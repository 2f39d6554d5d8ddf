//! Service container
//!
//! The `Container` owns every provider, every created instance and the
//! bookkeeping that keeps construction exactly-once across threads.

use crate::error::BoxError;
use crate::factory::ServiceFactory;
use crate::provider::{IntoInstance, RegisterOptions, canonical_type, default_service_name};
use crate::resolver::Resolver;
use crate::scope::Scope;
use crate::shutdown;
use crate::storage::Registry;
use crate::{DiError, Result};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread::{self, ThreadId};

#[cfg(feature = "logging")]
use tracing::debug;

/// Names with this prefix can only be replaced through the protected override
pub const PROTECTED_PREFIX: &str = "service.";

/// Shared state behind every clone of a container
pub(crate) struct ContainerInner {
    /// Registry, instances and construction bookkeeping
    pub(crate) state: RwLock<Registry>,
    /// Memoized result of the first `close`
    closed: OnceCell<Result<()>>,
    /// Thread running the close handlers, while they run
    closing: Mutex<Option<ThreadId>>,
}

/// Lazily-instantiating, thread-safe service container.
///
/// Providers are registered by name (and, by default, by the canonical type
/// they produce). Each provider runs at most once; its instance is then
/// shared by every caller until the container is closed.
///
/// Cloning a container is cheap and yields a handle to the same services.
///
/// # Examples
///
/// ```rust
/// use service_container::{Container, RegisterOptions};
/// use std::sync::Arc;
///
/// struct Greeter { greeting: String }
///
/// let container = Container::new();
/// container
///     .register(
///         "greeter",
///         |_| Ok(Arc::new(Greeter { greeting: "hello".into() })),
///         RegisterOptions::default(),
///     )
///     .unwrap();
///
/// let by_name = container.get::<Greeter>("greeter").unwrap();
/// let by_type = container.get_by_type::<Greeter>().unwrap();
/// assert!(Arc::ptr_eq(&by_name, &by_type));
/// assert_eq!(by_name.greeting, "hello");
/// ```
#[derive(Clone)]
pub struct Container {
    pub(crate) inner: Arc<ContainerInner>,
}

impl Container {
    /// Create an empty container.
    #[inline]
    pub fn new() -> Self {
        #[cfg(feature = "logging")]
        debug!(target: "service_container", "Creating new service container");

        Self::from_registry(Registry::new())
    }

    /// Create a container with pre-allocated capacity.
    ///
    /// Use this when you know approximately how many services will be registered.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            capacity = capacity,
            "Creating new service container with capacity"
        );

        Self::from_registry(Registry::with_capacity(capacity))
    }

    fn from_registry(registry: Registry) -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                state: RwLock::new(registry),
                closed: OnceCell::new(),
                closing: Mutex::new(None),
            }),
        }
    }

    // =========================================================================
    // Registration Methods
    // =========================================================================

    /// Register a provider under `name`.
    ///
    /// The provider receives a [`Resolver`] for its own dependencies and may
    /// return `Arc<T>`, [`Closeable<T>`](crate::Closeable), or an `Option`
    /// of either; `None` is reported as a construction failure.
    ///
    /// Fails if the name is empty or taken, or if strict type registration
    /// finds the type claimed by another name. A failed call leaves nothing
    /// registered.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use service_container::{Container, DiError, RegisterOptions};
    /// use std::sync::Arc;
    ///
    /// struct Cache;
    ///
    /// let container = Container::new();
    /// container.register("cache", |_| Ok(Arc::new(Cache)), RegisterOptions::default()).unwrap();
    ///
    /// let err = container
    ///     .register("cache", |_| Ok(Arc::new(Cache)), RegisterOptions::default())
    ///     .unwrap_err();
    /// assert!(matches!(err, DiError::AlreadyRegistered { .. }));
    /// ```
    pub fn register<F, R>(&self, name: &str, provider: F, options: RegisterOptions) -> Result<()>
    where
        F: Fn(&Resolver<'_>) -> std::result::Result<R, BoxError> + Send + Sync + 'static,
        R: IntoInstance,
    {
        let factory = ServiceFactory::new(provider);

        #[cfg(feature = "logging")]
        let service_type = factory.service_type();

        let mut state = self.inner.state.write();
        state.register(name, factory, options)?;

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            service = name,
            service_type = service_type.name(),
            by_type = options.registers_type(),
            strict = options.is_strict(),
            service_count = state.len(),
            "Registered service provider"
        );

        Ok(())
    }

    /// Register a provider, panicking on failure.
    #[track_caller]
    pub fn must_register<F, R>(&self, name: &str, provider: F, options: RegisterOptions)
    where
        F: Fn(&Resolver<'_>) -> std::result::Result<R, BoxError> + Send + Sync + 'static,
        R: IntoInstance,
    {
        if let Err(err) = self.register(name, provider, options) {
            panic!("{err}");
        }
    }

    /// Register a provider under the default name of the type it produces.
    ///
    /// Type registration is always on; `options` only decides strictness.
    pub fn register_type<F, R>(&self, provider: F, options: RegisterOptions) -> Result<()>
    where
        F: Fn(&Resolver<'_>) -> std::result::Result<R, BoxError> + Send + Sync + 'static,
        R: IntoInstance,
    {
        let name = default_service_name::<R::Service>();
        let options = options.with_type_registration(options.is_strict());
        self.register(&name, provider, options)
    }

    /// Register by type, panicking on failure.
    #[track_caller]
    pub fn must_register_type<F, R>(&self, provider: F, options: RegisterOptions)
    where
        F: Fn(&Resolver<'_>) -> std::result::Result<R, BoxError> + Send + Sync + 'static,
        R: IntoInstance,
    {
        if let Err(err) = self.register_type(provider, options) {
            panic!("{err}");
        }
    }

    // =========================================================================
    // Resolution Methods
    // =========================================================================

    /// Resolve a service by name, constructing it on first use.
    ///
    /// Every call runs in a fresh resolver context.
    pub fn get<T: ?Sized + 'static>(&self, name: &str) -> Result<Arc<T>> {
        Resolver::new(self, None).get::<T>(name)
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
    ///
    /// Fails with [`DiError::TypeConflict`] when several names claim the type.
    pub fn get_by_type<T: ?Sized + 'static>(&self) -> Result<Arc<T>> {
        Resolver::new(self, None).get_by_type::<T>()
    }

    /// Resolve a service by type, panicking on failure.
    #[track_caller]
    pub fn must_get_by_type<T: ?Sized + 'static>(&self) -> Arc<T> {
        match self.get_by_type::<T>() {
            Ok(service) => service,
            Err(err) => panic!("{err}"),
        }
    }

    /// A resolver context for several related lookups.
    ///
    /// Lookups through one resolver share its id and stack.
    #[inline]
    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(self, None)
    }

    /// Whether a provider or instance exists for `name`. Never constructs.
    #[inline]
    pub fn has(&self, name: &str) -> bool {
        self.inner.state.read().has(name)
    }

    /// Whether anything is registered for the canonical type of `T`. Never constructs.
    #[inline]
    pub fn has_type<T: ?Sized + 'static>(&self) -> bool {
        self.inner.state.read().has_type(&canonical_type::<T>())
    }

    // =========================================================================
    // Overrides
    // =========================================================================

    /// Replace the instance of a registered service.
    ///
    /// Names starting with [`PROTECTED_PREFIX`] are refused.
    pub fn override_instance<V: IntoInstance>(&self, name: &str, value: V) -> Result<()> {
        if name.starts_with(PROTECTED_PREFIX) {
            return Err(DiError::protected(name));
        }

        self.override_protected_instance(name, value)
    }

    /// Replace the instance of a registered service, protected or not.
    ///
    /// Every canonical type mapped to `name` resolves to the new value too.
    pub fn override_protected_instance<V: IntoInstance>(&self, name: &str, value: V) -> Result<()> {
        if name.is_empty() {
            return Err(DiError::EmptyName);
        }

        let Some(instance) = value.into_instance() else {
            return Err(DiError::EmptyOverride {
                name: name.to_string(),
            });
        };

        self.inner.state.write().override_instance(name, instance)?;

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            service = name,
            "Overrode service instance"
        );

        Ok(())
    }

    /// Override, panicking on failure.
    #[track_caller]
    pub fn must_override_instance<V: IntoInstance>(&self, name: &str, value: V) {
        if let Err(err) = self.override_instance(name, value) {
            panic!("{err}");
        }
    }

    /// Protected override, panicking on failure.
    #[track_caller]
    pub fn must_override_protected_instance<V: IntoInstance>(&self, name: &str, value: V) {
        if let Err(err) = self.override_protected_instance(name, value) {
            panic!("{err}");
        }
    }

    // =========================================================================
    // Scopes and lifecycle
    // =========================================================================

    /// Create a scope with its own override overlay.
    #[inline]
    pub fn new_scope(&self) -> Scope {
        Scope::new(self.clone())
    }

    /// Close every created service, dependents first.
    ///
    /// Only the first call does any work; later calls return its result.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use service_container::{BoxError, Close, Closeable, Container, RegisterOptions};
    /// use std::sync::Arc;
    ///
    /// struct Pool;
    ///
    /// impl Close for Pool {
    ///     fn close(&self) -> Result<(), BoxError> {
    ///         Err("pool busy".into())
    ///     }
    /// }
    ///
    /// let container = Container::new();
    /// container
    ///     .register("pool", |_| Ok(Closeable::from_value(Pool)), RegisterOptions::default())
    ///     .unwrap();
    /// container.get::<Pool>("pool").unwrap();
    ///
    /// let first = container.close().unwrap_err();
    /// let second = container.close().unwrap_err();
    /// assert_eq!(first.to_string(), second.to_string());
    /// ```
    ///
    /// A close handler that calls `close` on its own container gets
    /// [`DiError::CloseInProgress`] instead of blocking forever.
    pub fn close(&self) -> Result<()> {
        if let Some(result) = self.inner.closed.get() {
            return result.clone();
        }
        if *self.inner.closing.lock() == Some(thread::current().id()) {
            return Err(DiError::CloseInProgress);
        }

        self.inner
            .closed
            .get_or_init(|| {
                *self.inner.closing.lock() = Some(thread::current().id());
                let plan = shutdown::plan(&self.inner.state.write());
                let result = shutdown::execute(plan);
                *self.inner.closing.lock() = None;
                result
            })
            .clone()
    }

    /// Whether `close` has run
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get().is_some()
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// All registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.inner.state.read().names()
    }

    /// Number of registered providers
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.state.read().len()
    }

    /// Whether no provider is registered
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("state", &*self.inner.state.read())
            .field("closed", &self.is_closed())
            .finish()
    }
}
