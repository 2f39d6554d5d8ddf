//! Registry state for the container
//!
//! Everything here lives behind the container's single reader/writer lock;
//! none of these methods lock on their own.

use crate::factory::ServiceFactory;
use crate::guard::CreationState;
use crate::provider::{Instance, RegisterOptions, ServiceType};
use crate::wait_graph::WaitForGraph;
use crate::{DiError, Result};
use ahash::RandomState;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Outcome of looking a canonical type up in the registry
#[derive(Debug)]
pub(crate) enum TypeLookup {
    /// Exactly one name claims the type
    Name(String),
    /// Several names claim the type (non-strict registrations), sorted
    Conflict(Vec<String>),
    /// No name claims the type, but an instance was placed under it directly
    Instance(Instance),
    /// Nothing is known about the type
    Missing,
}

/// Providers, instances and construction bookkeeping
pub(crate) struct Registry {
    /// Provider per service name
    providers: HashMap<String, Arc<ServiceFactory>, RandomState>,
    /// Created (or overridden) instances by name
    instances: HashMap<String, Instance, RandomState>,
    /// Instances by canonical type
    type_instances: HashMap<ServiceType, Instance, RandomState>,
    /// Names claiming each canonical type, in registration order
    type_names: HashMap<ServiceType, Vec<String>, RandomState>,
    /// In-flight constructions by name
    creating: HashMap<String, Arc<CreationState>, RandomState>,
    /// Which resolver waits on which
    pub(crate) wait_graph: WaitForGraph,
    /// dependent -> dependencies, recorded as constructions resolve each other
    dependencies: HashMap<String, BTreeSet<String>, RandomState>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::with_capacity(0)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            providers: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            instances: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            type_instances: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            type_names: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            creating: HashMap::default(),
            wait_graph: WaitForGraph::new(),
            dependencies: HashMap::default(),
        }
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a provider, rolling back the name if the type claim fails
    pub(crate) fn register(
        &mut self,
        name: &str,
        factory: ServiceFactory,
        options: RegisterOptions,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(DiError::EmptyName);
        }

        if self.providers.contains_key(name) {
            return Err(DiError::already_registered(name));
        }

        let service_type = factory.service_type();
        self.providers.insert(name.to_string(), Arc::new(factory));

        if options.registers_type() {
            if let Err(err) = self.register_type(name, service_type, options.is_strict()) {
                self.providers.remove(name);
                return Err(err);
            }
        }

        Ok(())
    }

    fn register_type(&mut self, name: &str, service_type: ServiceType, strict: bool) -> Result<()> {
        if service_type.is_erased() {
            return Err(DiError::ErasedTypeRegistration {
                name: name.to_string(),
            });
        }

        let names = self.type_names.entry(service_type).or_default();
        if let Some(existing) = names.first() {
            if strict {
                return Err(DiError::TypeAlreadyRegistered {
                    name: name.to_string(),
                    service_type: service_type.name(),
                    existing: existing.clone(),
                });
            }
        }

        names.push(name.to_string());
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    #[inline]
    pub(crate) fn provider(&self, name: &str) -> Option<Arc<ServiceFactory>> {
        self.providers.get(name).cloned()
    }

    #[inline]
    pub(crate) fn instance(&self, name: &str) -> Option<Instance> {
        self.instances.get(name).cloned()
    }

    pub(crate) fn has(&self, name: &str) -> bool {
        !name.is_empty() && (self.instances.contains_key(name) || self.providers.contains_key(name))
    }

    pub(crate) fn has_type(&self, service_type: &ServiceType) -> bool {
        self.type_instances.contains_key(service_type)
            || self
                .type_names
                .get(service_type)
                .is_some_and(|names| !names.is_empty())
    }

    pub(crate) fn lookup_type(&self, service_type: &ServiceType) -> TypeLookup {
        match self.type_names.get(service_type).map(Vec::as_slice) {
            Some([name]) => TypeLookup::Name(name.clone()),
            Some(names) if names.len() > 1 => {
                let mut conflicts = names.to_vec();
                conflicts.sort();
                TypeLookup::Conflict(conflicts)
            }
            _ => match self.type_instances.get(service_type) {
                Some(instance) => TypeLookup::Instance(instance.clone()),
                None => TypeLookup::Missing,
            },
        }
    }

    /// Canonical types currently mapped to `name`
    pub(crate) fn types_for(&self, name: &str) -> Vec<ServiceType> {
        self.type_names
            .iter()
            .filter(|(_, names)| names.iter().any(|registered| registered == name))
            .map(|(service_type, _)| *service_type)
            .collect()
    }

    /// All registered names, sorted
    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.providers.len()
    }

    // =========================================================================
    // Instances
    // =========================================================================

    /// Memoize a created instance under its name and every type mapped to it
    pub(crate) fn store_instance(&mut self, name: &str, instance: Instance) {
        for service_type in self.types_for(name) {
            self.type_instances.insert(service_type, instance.clone());
        }
        self.instances.insert(name.to_string(), instance);
    }

    /// Replace the instance of a registered name.
    ///
    /// The value's own canonical type and every type mapped to the name
    /// observe the override too.
    pub(crate) fn override_instance(&mut self, name: &str, instance: Instance) -> Result<()> {
        if name.is_empty() {
            return Err(DiError::EmptyName);
        }

        if !self.providers.contains_key(name) {
            return Err(DiError::OverrideNotRegistered {
                name: name.to_string(),
            });
        }

        self.type_instances
            .insert(instance.service_type(), instance.clone());
        self.store_instance(name, instance);
        Ok(())
    }

    pub(crate) fn instances(&self) -> impl Iterator<Item = (&String, &Instance)> {
        self.instances.iter()
    }

    pub(crate) fn type_instances(&self) -> impl Iterator<Item = (&ServiceType, &Instance)> {
        self.type_instances.iter()
    }

    // =========================================================================
    // Construction bookkeeping
    // =========================================================================

    #[inline]
    pub(crate) fn creating(&self, name: &str) -> Option<Arc<CreationState>> {
        self.creating.get(name).cloned()
    }

    pub(crate) fn begin_creation(&mut self, name: &str, state: Arc<CreationState>) {
        self.creating.insert(name.to_string(), state);
    }

    pub(crate) fn finish_creation(&mut self, name: &str) {
        self.creating.remove(name);
    }

    pub(crate) fn record_dependency(&mut self, dependent: &str, dependency: &str) {
        if dependent.is_empty() || dependency.is_empty() || dependent == dependency {
            return;
        }

        self.dependencies
            .entry(dependent.to_string())
            .or_default()
            .insert(dependency.to_string());
    }

    pub(crate) fn dependencies(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.dependencies.iter()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("providers", &self.providers.len())
            .field("instances", &self.instances.len())
            .field("creating", &self.creating.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::canonical_type;

    struct Mailer;

    fn mailer_factory() -> ServiceFactory {
        ServiceFactory::new(|_| Ok(Arc::new(Mailer)))
    }

    #[test]
    fn test_register_and_has() {
        let mut registry = Registry::new();
        registry
            .register("mailer", mailer_factory(), RegisterOptions::default())
            .unwrap();

        assert!(registry.has("mailer"));
        assert!(!registry.has("other"));
        assert!(!registry.has(""));
        assert!(registry.has_type(&canonical_type::<Mailer>()));
        assert_eq!(registry.names(), vec!["mailer".to_string()]);
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut registry = Registry::new();
        let err = registry
            .register("", mailer_factory(), RegisterOptions::default())
            .unwrap_err();
        assert!(matches!(err, DiError::EmptyName));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = Registry::new();
        registry
            .register("mailer", mailer_factory(), RegisterOptions::default())
            .unwrap();
        let err = registry
            .register("mailer", mailer_factory(), RegisterOptions::default())
            .unwrap_err();

        assert!(matches!(err, DiError::AlreadyRegistered { .. }));
        assert!(registry.provider("mailer").is_some());
    }

    #[test]
    fn test_strict_type_conflict_rolls_back_name() {
        let mut registry = Registry::new();
        registry
            .register("mailer.a", mailer_factory(), RegisterOptions::default())
            .unwrap();
        let err = registry
            .register("mailer.b", mailer_factory(), RegisterOptions::default())
            .unwrap_err();

        match err {
            DiError::TypeAlreadyRegistered { existing, .. } => assert_eq!(existing, "mailer.a"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!registry.has("mailer.b"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_non_strict_type_reports_conflict() {
        let mut registry = Registry::new();
        let loose = RegisterOptions::new().with_type_registration(false);
        registry.register("mailer.b", mailer_factory(), loose).unwrap();
        registry.register("mailer.a", mailer_factory(), loose).unwrap();

        match registry.lookup_type(&canonical_type::<Mailer>()) {
            TypeLookup::Conflict(names) => assert_eq!(names, vec!["mailer.a", "mailer.b"]),
            other => panic!("unexpected lookup: {other:?}"),
        }
    }

    #[test]
    fn test_name_only_registration_has_no_type() {
        let mut registry = Registry::new();
        registry
            .register(
                "mailer",
                mailer_factory(),
                RegisterOptions::new().without_type_registration(),
            )
            .unwrap();

        assert!(!registry.has_type(&canonical_type::<Mailer>()));
        assert!(matches!(
            registry.lookup_type(&canonical_type::<Mailer>()),
            TypeLookup::Missing
        ));
    }

    #[test]
    fn test_store_instance_maps_types() {
        let mut registry = Registry::new();
        registry
            .register("mailer", mailer_factory(), RegisterOptions::default())
            .unwrap();
        registry.store_instance("mailer", Instance::new(Arc::new(Mailer)));

        assert!(registry.instance("mailer").is_some());
        assert_eq!(registry.type_instances().count(), 1);
    }

    #[test]
    fn test_override_requires_registration() {
        let mut registry = Registry::new();
        let err = registry
            .override_instance("missing", Instance::new(Arc::new(Mailer)))
            .unwrap_err();
        assert!(matches!(err, DiError::OverrideNotRegistered { .. }));
    }

    #[test]
    fn test_record_dependency_ignores_self_edges() {
        let mut registry = Registry::new();
        registry.record_dependency("a", "a");
        registry.record_dependency("a", "b");
        registry.record_dependency("a", "b");

        let edges: Vec<_> = registry.dependencies().collect();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].1.len(), 1);
    }
}
