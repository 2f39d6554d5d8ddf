//! Provider-facing traits and types
//!
//! These define what can be stored in the container, how a provider hands
//! its result over, and how services are keyed by type.

use crate::error::BoxError;
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Marker trait for types that can be stored in the container.
///
/// This is automatically implemented for every `Send + Sync + 'static` type,
/// including trait objects such as `dyn Mailer + Send + Sync`.
pub trait Injectable: Send + Sync + 'static {}

// Blanket implementation - everything that's Send + Sync + 'static is Injectable
impl<T: ?Sized + Send + Sync + 'static> Injectable for T {}

/// Type identity used for type-based registration and lookup.
///
/// Equality and hashing use the `TypeId`; the name is kept for diagnostics
/// and for deriving default service names.
#[derive(Clone, Copy)]
pub struct ServiceType {
    id: TypeId,
    name: &'static str,
}

impl ServiceType {
    /// The type tag of `T` as written, without canonicalization.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The `TypeId` of the type
    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The type name (as reported by `std::any::type_name`)
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this is an erased `dyn Any` type, which cannot key a registration.
    pub fn is_erased(&self) -> bool {
        self.id == TypeId::of::<dyn Any + Send + Sync>()
            || self.id == TypeId::of::<dyn Any + Send>()
            || self.id == TypeId::of::<dyn Any>()
    }
}

impl PartialEq for ServiceType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceType {}

impl Hash for ServiceType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceType({})", self.name)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Canonical type of a service shared as `Arc<T>`.
///
/// Every instance lives behind an `Arc`, so the pointer is not part of the
/// identity: a provider returning `Arc<T>` (or `Closeable<T>`, or
/// `Option<Arc<T>>`) registers `T`, and lookups name `T` as well. Trait
/// objects are kept as the trait object type, so a service registered as
/// `Arc<dyn Mailer + Send + Sync>` is found with
/// `get_by_type::<dyn Mailer + Send + Sync>()`, never through its concrete type.
#[inline]
pub fn canonical_type<T: ?Sized + 'static>() -> ServiceType {
    ServiceType::of::<T>()
}

/// Default service name for a type registered without an explicit name.
#[inline]
pub fn default_service_name<T: ?Sized + 'static>() -> String {
    canonical_type::<T>().name().to_string()
}

/// Teardown capability for services created by the container.
///
/// The container calls `close` once per instance when it is closed, after
/// every service that depends on it.
pub trait Close: Send + Sync {
    /// Release the resources held by the service.
    fn close(&self) -> Result<(), BoxError>;
}

/// Wrapper a provider returns to register a service's [`Close`] handler.
///
/// ```rust
/// use service_container::{BoxError, Close, Closeable, Container, RegisterOptions};
/// use std::sync::Arc;
///
/// struct Pool;
///
/// impl Close for Pool {
///     fn close(&self) -> Result<(), BoxError> {
///         Ok(())
///     }
/// }
///
/// let container = Container::new();
/// container
///     .register("pool", |_| Ok(Closeable::new(Arc::new(Pool))), RegisterOptions::default())
///     .unwrap();
/// ```
pub struct Closeable<T: ?Sized>(Arc<T>);

impl<T: ?Sized + Close + 'static> Closeable<T> {
    /// Wrap a shared service
    #[inline]
    pub fn new(service: Arc<T>) -> Self {
        Self(service)
    }

    /// The wrapped service
    #[inline]
    pub fn service(&self) -> &Arc<T> {
        &self.0
    }
}

impl<T: Close + 'static> Closeable<T> {
    /// Wrap an owned value
    #[inline]
    pub fn from_value(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl<T: ?Sized + Close + 'static> From<Arc<T>> for Closeable<T> {
    fn from(service: Arc<T>) -> Self {
        Self(service)
    }
}

/// Invoked by the container to tear an instance down
pub(crate) type Closer = Arc<dyn Fn() -> Result<(), BoxError> + Send + Sync>;

/// A type-erased service instance.
///
/// Holds the `Arc<T>` handed out to callers, the canonical type it was
/// created as, its allocation identity (so aliases close once) and an
/// optional close handler.
#[derive(Clone)]
pub struct Instance {
    value: Arc<dyn Any + Send + Sync>,
    service_type: ServiceType,
    identity: usize,
    closer: Option<Closer>,
}

impl Instance {
    /// Erase a shared service
    pub fn new<T: ?Sized + Injectable>(service: Arc<T>) -> Self {
        let identity = Arc::as_ptr(&service) as *const () as usize;
        Self {
            value: Arc::new(service) as Arc<dyn Any + Send + Sync>,
            service_type: canonical_type::<T>(),
            identity,
            closer: None,
        }
    }

    /// Erase a shared service and keep its close handler
    pub fn closeable<T: ?Sized + Close + 'static>(service: Arc<T>) -> Self {
        let handle = Arc::clone(&service);
        let mut instance = Self::new(service);
        instance.closer = Some(Arc::new(move || handle.close()));
        instance
    }

    /// Recover the `Arc<T>` if the instance was created as `T`
    #[inline]
    pub fn downcast<T: ?Sized + 'static>(&self) -> Option<Arc<T>> {
        self.value.downcast_ref::<Arc<T>>().cloned()
    }

    /// The canonical type the instance was created as
    #[inline]
    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    /// Whether the instance has a close handler
    #[inline]
    pub fn is_closeable(&self) -> bool {
        self.closer.is_some()
    }

    #[inline]
    pub(crate) fn identity(&self) -> usize {
        self.identity
    }

    #[inline]
    pub(crate) fn closer(&self) -> Option<&Closer> {
        self.closer.as_ref()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("service_type", &self.service_type)
            .field("closeable", &self.is_closeable())
            .finish()
    }
}

/// Values a provider may return.
///
/// `Arc<T>` and `Closeable<T>` always produce an instance; their `Option`
/// forms may produce none, which the container reports as a construction
/// failure.
pub trait IntoInstance {
    /// The canonical service type produced
    type Service: ?Sized + Injectable;

    /// Convert into an erased instance, or `None` for an empty result
    fn into_instance(self) -> Option<Instance>;
}

impl<T: ?Sized + Injectable> IntoInstance for Arc<T> {
    type Service = T;

    #[inline]
    fn into_instance(self) -> Option<Instance> {
        Some(Instance::new(self))
    }
}

impl<T: ?Sized + Injectable> IntoInstance for Option<Arc<T>> {
    type Service = T;

    #[inline]
    fn into_instance(self) -> Option<Instance> {
        self.map(Instance::new)
    }
}

impl<T: ?Sized + Close + 'static> IntoInstance for Closeable<T> {
    type Service = T;

    #[inline]
    fn into_instance(self) -> Option<Instance> {
        Some(Instance::closeable(self.0))
    }
}

impl<T: ?Sized + Close + 'static> IntoInstance for Option<Closeable<T>> {
    type Service = T;

    #[inline]
    fn into_instance(self) -> Option<Instance> {
        self.map(|closeable| Instance::closeable(closeable.0))
    }
}

/// Options for a registration.
///
/// By default a service is registered by name and also by its canonical
/// type, strictly: a second name claiming the same type is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterOptions {
    also_register_type: bool,
    strict_type: bool,
}

impl Default for RegisterOptions {
    fn default() -> Self {
        Self {
            also_register_type: true,
            strict_type: true,
        }
    }
}

impl RegisterOptions {
    /// Default options (type registration on, strict)
    pub fn new() -> Self {
        Self::default()
    }

    /// Also register by type; `strict` rejects a type already claimed by another name
    pub fn with_type_registration(mut self, strict: bool) -> Self {
        self.also_register_type = true;
        self.strict_type = strict;
        self
    }

    /// Register by name only
    pub fn without_type_registration(mut self) -> Self {
        self.also_register_type = false;
        self
    }

    /// Whether the service is also registered by type
    #[inline]
    pub fn registers_type(&self) -> bool {
        self.also_register_type
    }

    /// Whether the type claim is strict
    #[inline]
    pub fn is_strict(&self) -> bool {
        self.strict_type
    }
}
