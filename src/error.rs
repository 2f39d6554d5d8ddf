//! Error types for the service container

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Error type returned by providers and close handlers.
///
/// Anything implementing `std::error::Error + Send + Sync` converts into it
/// with `?`, including [`DiError`] itself.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A user error shared between every caller that observes it.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while registering, resolving or closing services
#[derive(Error, Debug, Clone)]
pub enum DiError {
    /// An empty service name was passed to a registration or lookup
    #[error("Service name is required")]
    EmptyName,

    /// A provider is already registered under this name
    #[error("Service already registered: {name}")]
    AlreadyRegistered { name: String },

    /// Strict type registration found the type claimed by another name
    #[error("Service type {service_type} already registered by {existing} (registering {name})")]
    TypeAlreadyRegistered {
        name: String,
        service_type: &'static str,
        existing: String,
    },

    /// Type registration was requested for an erased `dyn Any` service
    #[error("Type registration requires a concrete type: {name}")]
    ErasedTypeRegistration { name: String },

    /// No provider is registered under this name
    #[error("Service not found: {name}")]
    NotFound { name: String },

    /// Nothing is registered for this canonical type
    #[error("Service type not found: {service_type}")]
    TypeNotFound { service_type: &'static str },

    /// The resolved value has a different type than the caller asked for
    #[error("Service {key} has type {actual}, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Several names claim the same canonical type (non-strict registration)
    #[error("Service type {service_type} has multiple registrations: {}", conflicts.join(", "))]
    TypeConflict {
        service_type: &'static str,
        conflicts: Vec<String>,
    },

    /// The provider returned an error
    #[error("Provider for {key} failed (requested {requested}, stack {stack}): {source}")]
    ProviderFailed {
        key: String,
        requested: String,
        stack: String,
        source: SharedError,
    },

    /// The provider panicked; the panic was caught
    #[error("Provider for {key} panicked (requested {requested}, stack {stack}): {payload}")]
    ProviderPanicked {
        key: String,
        requested: String,
        stack: String,
        payload: String,
    },

    /// The provider returned no instance
    #[error("Provider {provider} for {key} returned no instance of {service_type} (stack {stack})")]
    EmptyInstance {
        key: String,
        requested: String,
        stack: String,
        service_type: &'static str,
        provider: &'static str,
    },

    /// The key is already on the resolver's own stack
    #[error("Circular service dependency detected: {stack}")]
    CircularDependency { key: String, stack: String },

    /// A resolver would wait on a construction it owns itself
    #[error("Circular service dependency detected while resolving {key} in resolver {context_id} (stack {stack})")]
    SelfWait {
        key: String,
        context_id: u64,
        stack: String,
    },

    /// Waiting would close a cycle in the wait-for graph
    #[error("Circular service dependency detected across concurrent resolutions: resolver {waiter} waiting on {owner} for {key} (stack {stack})")]
    Deadlock {
        key: String,
        waiter: u64,
        owner: u64,
        stack: String,
    },

    /// Another resolver's construction, which this one waited for, failed
    #[error("Service creation failed for {key} (owner resolver {owner}, waiting resolver {waiter}): {source}")]
    CreationFailed {
        key: String,
        owner: u64,
        waiter: u64,
        source: Arc<DiError>,
    },

    /// The name is protected and can only be replaced with a protected override
    #[error("Service is protected and cannot be overridden: {name}")]
    Protected { name: String },

    /// An override targeted a name without a provider
    #[error("Service not registered in container: {name}")]
    OverrideNotRegistered { name: String },

    /// An override was given no instance
    #[error("Override value is empty for service: {name}")]
    EmptyOverride { name: String },

    /// The scope was closed
    #[error("Scope has been closed")]
    ScopeClosed,

    /// One or more close handlers failed
    #[error("Failed to close container services: {}", format_failures(failures))]
    CloseFailed { failures: BTreeMap<String, String> },

    /// Created services depend on each other in a cycle
    #[error("Container close dependency cycle detected: {}", nodes.join(", "))]
    DependencyCycle { nodes: Vec<String> },

    /// A close handler called `close` on the container it belongs to
    #[error("Container close already in progress on this thread")]
    CloseInProgress,

    /// Internal error
    #[error("Internal DI error: {0}")]
    Internal(String),
}

/// Failure key used when a dependency cycle is merged into close failures
pub const DEPENDENCY_CYCLE_KEY: &str = "container.dependencyCycle";

fn format_failures(failures: &BTreeMap<String, String>) -> String {
    failures
        .iter()
        .map(|(key, reason)| format!("{key}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl DiError {
    /// Create a NotFound error for a name
    #[inline]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Create an AlreadyRegistered error
    #[inline]
    pub fn already_registered(name: impl Into<String>) -> Self {
        Self::AlreadyRegistered { name: name.into() }
    }

    /// Create a Protected error
    #[inline]
    pub fn protected(name: impl Into<String>) -> Self {
        Self::Protected { name: name.into() }
    }

    /// Follow provider and waiter wrappers down to the error that started it.
    ///
    /// A provider that propagates a container error with `?` produces a
    /// `ProviderFailed` whose source is that error; waiters see it behind a
    /// `CreationFailed`. This walks through both.
    pub fn innermost(&self) -> &DiError {
        let mut current = self;
        loop {
            let next = match current {
                Self::ProviderFailed { source, .. } => source.downcast_ref::<DiError>(),
                Self::CreationFailed { source, .. } => Some(source.as_ref()),
                _ => None,
            };

            match next {
                Some(inner) => current = inner,
                None => return current,
            }
        }
    }

    /// Whether the error (or the error it wraps) is a dependency cycle.
    pub fn is_circular(&self) -> bool {
        matches!(
            self.innermost(),
            Self::CircularDependency { .. } | Self::SelfWait { .. } | Self::Deadlock { .. }
        )
    }
}

/// Result type alias for container operations
pub type Result<T> = std::result::Result<T, DiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_innermost_walks_wrappers() {
        let cycle = DiError::Deadlock {
            key: "service:a".into(),
            waiter: 1,
            owner: 2,
            stack: "service:a".into(),
        };
        let boxed: BoxError = Box::new(cycle);
        let failed = DiError::ProviderFailed {
            key: "b".into(),
            requested: "service:b".into(),
            stack: "service:b".into(),
            source: Arc::from(boxed),
        };
        let waited = DiError::CreationFailed {
            key: "b".into(),
            owner: 2,
            waiter: 3,
            source: Arc::new(failed),
        };

        assert!(matches!(waited.innermost(), DiError::Deadlock { .. }));
        assert!(waited.is_circular());
        assert!(!DiError::not_found("x").is_circular());
    }

    #[test]
    fn test_close_failures_message() {
        let mut failures = BTreeMap::new();
        failures.insert("db".to_string(), "connection reset".to_string());
        failures.insert(DEPENDENCY_CYCLE_KEY.to_string(), "dependency cycle detected".to_string());

        let message = DiError::CloseFailed { failures }.to_string();
        assert!(message.contains("db: connection reset"));
        assert!(message.contains("container.dependencyCycle"));
    }

    #[test]
    fn test_type_conflict_lists_names() {
        let err = DiError::TypeConflict {
            service_type: "app::Mailer",
            conflicts: vec!["mailer.primary".into(), "mailer.backup".into()],
        };
        let message = err.to_string();
        assert!(message.contains("mailer.primary"));
        assert!(message.contains("mailer.backup"));
    }
}
