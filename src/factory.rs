//! Provider wrappers
//!
//! A provider is erased once at registration so the registry stores one
//! concrete type regardless of what the closure returns. The canonical
//! service type and the closure's type name travel with it for type
//! registration and diagnostics.

use crate::error::BoxError;
use crate::provider::{IntoInstance, Instance, ServiceType, canonical_type};
use crate::resolver::Resolver;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Type-erased provider function
type ProviderFn =
    Arc<dyn Fn(&Resolver<'_>) -> Result<Option<Instance>, BoxError> + Send + Sync>;

/// What a single provider invocation produced
pub(crate) enum Produced {
    /// A usable instance
    Instance(Instance),
    /// The provider succeeded but returned nothing
    Empty,
    /// The provider returned an error
    Failed(BoxError),
    /// The provider panicked; holds the panic message
    Panicked(String),
}

/// A registered provider
pub(crate) struct ServiceFactory {
    provider: ProviderFn,
    service_type: ServiceType,
    provider_name: &'static str,
}

impl ServiceFactory {
    /// Erase a provider closure
    pub(crate) fn new<F, R>(provider: F) -> Self
    where
        F: Fn(&Resolver<'_>) -> Result<R, BoxError> + Send + Sync + 'static,
        R: IntoInstance,
    {
        Self {
            provider: Arc::new(move |resolver: &Resolver<'_>| {
                provider(resolver).map(IntoInstance::into_instance)
            }),
            service_type: canonical_type::<R::Service>(),
            provider_name: std::any::type_name::<F>(),
        }
    }

    /// Canonical type the provider declares
    #[inline]
    pub(crate) fn service_type(&self) -> ServiceType {
        self.service_type
    }

    /// Type name of the provider closure
    #[inline]
    pub(crate) fn provider_name(&self) -> &'static str {
        self.provider_name
    }

    /// Run the provider, catching panics
    pub(crate) fn invoke(&self, resolver: &Resolver<'_>) -> Produced {
        match catch_unwind(AssertUnwindSafe(|| (self.provider)(resolver))) {
            Ok(Ok(Some(instance))) => Produced::Instance(instance),
            Ok(Ok(None)) => Produced::Empty,
            Ok(Err(err)) => Produced::Failed(err),
            Err(payload) => Produced::Panicked(panic_message(payload.as_ref())),
        }
    }
}

impl std::fmt::Debug for ServiceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceFactory")
            .field("service_type", &self.service_type)
            .field("provider", &self.provider_name)
            .finish()
    }
}

/// Render a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Container;

    struct Clock;

    #[test]
    fn test_declared_type() {
        let factory = ServiceFactory::new(|_| Ok(Arc::new(Clock)));
        assert_eq!(factory.service_type(), canonical_type::<Clock>());
        assert!(factory.provider_name().contains("closure"));
    }

    #[test]
    fn test_invoke_outcomes() {
        let container = Container::new();
        let resolver = container.resolver();

        let ok = ServiceFactory::new(|_| Ok(Arc::new(Clock)));
        assert!(matches!(ok.invoke(&resolver), Produced::Instance(_)));

        let empty = ServiceFactory::new(|_| Ok(None::<Arc<Clock>>));
        assert!(matches!(empty.invoke(&resolver), Produced::Empty));

        let failing = ServiceFactory::new(|_| -> Result<Arc<Clock>, BoxError> { Err("offline".into()) });
        match failing.invoke(&resolver) {
            Produced::Failed(err) => assert_eq!(err.to_string(), "offline"),
            _ => panic!("expected failure"),
        }

        let panicking = ServiceFactory::new(|_| -> Result<Arc<Clock>, BoxError> { panic!("boom") });
        match panicking.invoke(&resolver) {
            Produced::Panicked(message) => assert_eq!(message, "boom"),
            _ => panic!("expected panic"),
        }
    }

    #[test]
    fn test_panic_message_formats() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let number: Box<dyn Any + Send> = Box::new(7u8);

        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(number.as_ref()), "non-string panic payload");
    }
}
