//! # service-container - Lazily-Instantiating Service Container for Rust
//!
//! A thread-safe dependency injection container that wires an application
//! together at startup and hands out shared services at runtime.
//!
//! ## Features
//!
//! - 🏭 **Lazy singletons** - Providers run on first use, exactly once
//! - 🏷️ **Named and typed** - Resolve by service name or by canonical type
//! - 🔁 **Re-entrant** - Providers resolve their own dependencies through a [`Resolver`]
//! - 🧵 **Deadlock detection** - Cross-thread dependency cycles fail fast instead of hanging
//! - 🪟 **Scopes** - Per-request overrides, never stored in the container; providers first built through a scope see them
//! - 🧹 **Ordered shutdown** - Dependents close before their dependencies
//! - 📊 **Observable** - Optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use service_container::{Container, RegisterOptions};
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! struct UserService {
//!     db: Arc<Database>,
//! }
//!
//! let container = Container::new();
//!
//! container
//!     .register(
//!         "database",
//!         |_| Ok(Arc::new(Database { url: "postgres://localhost".into() })),
//!         RegisterOptions::default(),
//!     )
//!     .unwrap();
//!
//! container
//!     .register(
//!         "users",
//!         |resolver| Ok(Arc::new(UserService { db: resolver.get_by_type::<Database>()? })),
//!         RegisterOptions::default(),
//!     )
//!     .unwrap();
//!
//! let users = container.get::<UserService>("users").unwrap();
//! assert_eq!(users.db.url, "postgres://localhost");
//! ```
//!
//! ## Shutdown
//!
//! ```rust
//! use service_container::{BoxError, Close, Closeable, Container, RegisterOptions};
//! use std::sync::Arc;
//!
//! struct Pool;
//!
//! impl Close for Pool {
//!     fn close(&self) -> Result<(), BoxError> {
//!         Ok(())
//!     }
//! }
//!
//! let container = Container::new();
//! container
//!     .register("pool", |_| Ok(Closeable::from_value(Pool)), RegisterOptions::default())
//!     .unwrap();
//!
//! container.get::<Pool>("pool").unwrap();
//! container.close().unwrap();
//! ```
//!
//! ## Failures
//!
//! A failed or panicking provider is reported to every caller waiting on
//! it, and nothing is memoized: the next `get` runs the provider again.

mod container;
mod error;
mod factory;
mod guard;
#[cfg(feature = "logging")]
pub mod logging;
mod provider;
mod resolver;
mod scope;
mod shutdown;
mod storage;
mod wait_graph;

pub use container::*;
pub use error::*;
pub use provider::*;
pub use resolver::{Resolver, ResolverId};
pub use scope::*;

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BoxError, Close, Closeable, Container, DiError, Injectable, RegisterOptions, Resolver,
        Result, Scope,
    };
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Database {
        url: String,
    }

    struct UserService {
        db: Arc<Database>,
    }

    fn container() -> Container {
        let container = Container::new();
        container
            .register(
                "database",
                |_| Ok(Arc::new(Database { url: "production".into() })),
                RegisterOptions::default(),
            )
            .unwrap();
        container
            .register(
                "users",
                |resolver| {
                    Ok(Arc::new(UserService {
                        db: resolver.get::<Database>("database")?,
                    }))
                },
                RegisterOptions::default(),
            )
            .unwrap();
        container
    }

    #[test]
    fn test_lazy_singleton() {
        static CREATED: AtomicU32 = AtomicU32::new(0);

        struct LazyService;

        let container = Container::new();
        container
            .register(
                "lazy",
                |_| {
                    CREATED.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(LazyService))
                },
                RegisterOptions::default(),
            )
            .unwrap();

        assert_eq!(CREATED.load(Ordering::SeqCst), 0);

        let first = container.get::<LazyService>("lazy").unwrap();
        let second = container.get_by_type::<LazyService>().unwrap();
        assert_eq!(CREATED.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_dependencies_share_instances() {
        let container = container();

        let users = container.get::<UserService>("users").unwrap();
        let db = container.get::<Database>("database").unwrap();
        assert!(Arc::ptr_eq(&users.db, &db));
    }

    #[test]
    fn test_scope_override_in_dependency() {
        let root = container();
        let scope = root.new_scope();
        scope
            .override_instance("database", Arc::new(Database { url: "test".into() }))
            .unwrap();

        assert_eq!(scope.get::<Database>("database").unwrap().url, "test");
        assert_eq!(root.get::<Database>("database").unwrap().url, "production");
    }

    #[test]
    fn test_prelude_exports() {
        use crate::prelude::*;

        let container: Container = Container::default();
        let options = RegisterOptions::default();
        assert!(options.registers_type());
        assert!(container.names().is_empty());
    }
}
