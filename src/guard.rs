//! Creation guard
//!
//! Makes sure a provider runs at most once at a time per service name. The
//! first resolver to miss becomes the owner and installs a [`CreationState`];
//! later resolvers wait on its completion signal. Waits are registered in the
//! wait-for graph first, so a wait that could never end fails immediately.

use crate::factory::Produced;
use crate::provider::Instance;
use crate::resolver::{Resolver, ResolverId};
use crate::wait_graph::WaitRejection;
use crate::{DiError, Result};
use parking_lot::{Condvar, Mutex, RwLockWriteGuard};
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

/// Outcome shared with every waiter of one construction
type Completion = std::result::Result<(), Arc<DiError>>;

/// An in-flight construction
#[derive(Debug)]
pub(crate) struct CreationState {
    owner: ResolverId,
    signal: Mutex<Option<Completion>>,
    cond: Condvar,
}

impl CreationState {
    pub(crate) fn new(owner: ResolverId) -> Self {
        Self {
            owner,
            signal: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    #[inline]
    pub(crate) fn owner(&self) -> ResolverId {
        self.owner
    }

    /// Publish the outcome and wake every waiter
    pub(crate) fn complete(&self, outcome: Completion) {
        let mut signal = self.signal.lock();
        *signal = Some(outcome);
        self.cond.notify_all();
    }

    /// Block until the owner publishes an outcome
    pub(crate) fn wait(&self) -> Completion {
        let mut signal = self.signal.lock();
        loop {
            if let Some(outcome) = signal.as_ref() {
                return outcome.clone();
            }
            self.cond.wait(&mut signal);
        }
    }
}

/// Return the instance for `name`, constructing it if nobody has yet.
///
/// `parent` is the service whose provider asked for `name`, if any; the
/// dependency edge is recorded whenever the instance is handed out.
pub(crate) fn materialize(
    resolver: &Resolver<'_>,
    name: &str,
    parent: Option<&str>,
) -> Result<Instance> {
    let inner = &resolver.container().inner;

    // Fast path: top-level lookups of an existing instance only read
    if parent.is_none() {
        if let Some(instance) = inner.state.read().instance(name) {
            #[cfg(feature = "logging")]
            trace!(
                target: "service_container",
                service = name,
                context_id = resolver.id().get(),
                "Service resolved from instance cache"
            );
            return Ok(instance);
        }
    }

    let mut state = inner.state.write();

    if let Some(instance) = state.instance(name) {
        if let Some(parent) = parent {
            state.record_dependency(parent, name);
        }
        return Ok(instance);
    }

    let Some(factory) = state.provider(name) else {
        return Err(DiError::not_found(name));
    };

    if let Some(creation) = state.creating(name) {
        return await_creation(resolver, state, name, parent, &creation);
    }

    let creation = Arc::new(CreationState::new(resolver.id()));
    state.begin_creation(name, Arc::clone(&creation));
    drop(state);

    #[cfg(feature = "logging")]
    debug!(
        target: "service_container",
        service = name,
        context_id = resolver.id().get(),
        depth = resolver.depth(),
        "Constructing service"
    );

    let result = match factory.invoke(resolver) {
        Produced::Instance(instance) => Ok(instance),
        Produced::Empty => Err(DiError::EmptyInstance {
            key: name.to_string(),
            requested: resolver.requested(),
            stack: resolver.stack(),
            service_type: factory.service_type().name(),
            provider: factory.provider_name(),
        }),
        Produced::Failed(source) => Err(DiError::ProviderFailed {
            key: name.to_string(),
            requested: resolver.requested(),
            stack: resolver.stack(),
            source: Arc::from(source),
        }),
        Produced::Panicked(payload) => {
            #[cfg(feature = "logging")]
            warn!(
                target: "service_container",
                service = name,
                context_id = resolver.id().get(),
                panic = %payload,
                "Provider panicked; converted to error"
            );

            Err(DiError::ProviderPanicked {
                key: name.to_string(),
                requested: resolver.requested(),
                stack: resolver.stack(),
                payload,
            })
        }
    };

    let mut state = inner.state.write();
    if let Ok(instance) = &result {
        state.store_instance(name, instance.clone());
        if let Some(parent) = parent {
            state.record_dependency(parent, name);
        }
    }
    state.finish_creation(name);
    drop(state);

    #[cfg(feature = "logging")]
    match &result {
        Ok(_) => debug!(
            target: "service_container",
            service = name,
            context_id = resolver.id().get(),
            "Service constructed"
        ),
        Err(err) => debug!(
            target: "service_container",
            service = name,
            context_id = resolver.id().get(),
            error = %err,
            "Service construction failed"
        ),
    }

    creation.complete(match &result {
        Ok(_) => Ok(()),
        Err(err) => Err(Arc::new(err.clone())),
    });

    result
}

/// Wait for another resolver's construction of `name` to finish
fn await_creation(
    resolver: &Resolver<'_>,
    mut state: RwLockWriteGuard<'_, crate::storage::Registry>,
    name: &str,
    parent: Option<&str>,
    creation: &Arc<CreationState>,
) -> Result<Instance> {
    let waiter = resolver.id();
    let owner = creation.owner();

    if let Err(rejection) = state.wait_graph.add_edge(waiter, owner) {
        let key = format!("service:{name}");
        let stack = resolver.stack();

        #[cfg(feature = "logging")]
        warn!(
            target: "service_container",
            service = name,
            context_id = waiter.get(),
            owner_context_id = owner.get(),
            stack = %stack,
            "Refusing to wait: waiting would deadlock"
        );

        return Err(match rejection {
            WaitRejection::SelfWait => DiError::SelfWait {
                key,
                context_id: waiter.get(),
                stack,
            },
            WaitRejection::Cycle => DiError::Deadlock {
                key,
                waiter: waiter.get(),
                owner: owner.get(),
                stack,
            },
        });
    }

    #[cfg(feature = "logging")]
    trace!(
        target: "service_container",
        service = name,
        context_id = waiter.get(),
        owner_context_id = owner.get(),
        "Waiting for in-flight construction"
    );

    let outcome = RwLockWriteGuard::unlocked(&mut state, || creation.wait());
    state.wait_graph.remove_edge(waiter, owner);

    if let Err(source) = outcome {
        return Err(DiError::CreationFailed {
            key: name.to_string(),
            owner: owner.get(),
            waiter: waiter.get(),
            source,
        });
    }

    match state.instance(name) {
        Some(instance) => {
            if let Some(parent) = parent {
                state.record_dependency(parent, name);
            }
            Ok(instance)
        }
        None => Err(DiError::Internal(format!(
            "construction of {name} completed without an instance"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_completion_reaches_every_waiter() {
        let state = Arc::new(CreationState::new(ResolverId::from_raw(1)));

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let state = Arc::clone(&state);
                thread::spawn(move || state.wait())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        state.complete(Err(Arc::new(DiError::not_found("db"))));

        for waiter in waiters {
            let outcome = waiter.join().unwrap();
            assert!(matches!(outcome.unwrap_err().as_ref(), DiError::NotFound { .. }));
        }
    }

    #[test]
    fn test_wait_after_completion_returns_immediately() {
        let state = CreationState::new(ResolverId::from_raw(2));
        state.complete(Ok(()));
        assert!(state.wait().is_ok());
        assert_eq!(state.owner(), ResolverId::from_raw(2));
    }
}
