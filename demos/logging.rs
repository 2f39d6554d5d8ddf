//! Demo of the container's log output
//!
//! Run with JSON logging (production):
//! ```bash
//! cargo run --example logging --features logging-json
//! ```
//!
//! Run with pretty logging (development):
//! ```bash
//! cargo run --example logging --features logging-pretty
//! ```

use service_container::{BoxError, Close, Closeable, Container, RegisterOptions};
use std::sync::Arc;

struct Database {
    url: String,
}

impl Close for Database {
    fn close(&self) -> Result<(), BoxError> {
        println!("  [App] Closing connection to {}", self.url);
        Ok(())
    }
}

struct UserService {
    db: Arc<Database>,
}

struct RequestContext {
    request_id: String,
}

fn main() {
    service_container::logging::builder().trace().init();

    println!("=== Service Container Logging Demo ===\n");

    // logs: "Creating new service container"
    let container = Container::new();

    // logs: "Registered service provider"
    container.must_register(
        "database",
        |_| {
            println!("  [App] Connecting to database...");
            Ok(Closeable::from_value(Database {
                url: "postgres://localhost/mydb".into(),
            }))
        },
        RegisterOptions::default(),
    );

    container.must_register(
        "users",
        |resolver| {
            Ok(Arc::new(UserService {
                db: resolver.get::<Database>("database")?,
            }))
        },
        RegisterOptions::default(),
    );

    container.must_register(
        "request",
        |_| {
            Ok(Arc::new(RequestContext {
                request_id: "default".into(),
            }))
        },
        RegisterOptions::default(),
    );

    // logs: "Constructing service" for users, then database
    let users = container.must_get::<UserService>("users");
    println!("  [App] Users service talks to {}", users.db.url);

    // logs: "Service resolved from instance cache"
    let _db = container.must_get_by_type::<Database>();

    // Missing services are errors, not panics
    if let Err(err) = container.get::<Database>("cache") {
        println!("  [App] Expected failure: {err}");
    }

    // logs: "Creating new scope", "Overrode service instance in scope"
    let scope = container.new_scope();
    scope.must_override_instance(
        "request",
        Arc::new(RequestContext {
            request_id: "req-12345".into(),
        }),
    );

    // logs: "Service resolved from scope overlay"
    let request = scope.must_get::<RequestContext>("request");
    println!("  [App] Scoped request id: {}", request.request_id);
    scope.close().expect("scope close");

    // logs: "Closing container services"
    container.close().expect("container close");

    println!("\n=== Demo Complete ===");
}
