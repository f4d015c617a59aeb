//! Basic example of the Mawsil service container.

use std::sync::Arc;

use mawsil_container::prelude::*;

// === Define your traits and types ===

trait Logger: Send + Sync {
    fn log(&self, msg: &str);
}

struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn log(&self, msg: &str) {
        println!("[LOG] {msg}");
    }
}

#[derive(Clone)]
struct Config {
    database_url: String,
}

struct Database {
    url: String,
    logger: Arc<dyn Logger>,
}

impl Database {
    fn query(&self, sql: &str) -> String {
        self.logger.log(&format!("Executing: {sql}"));
        format!("Results from {}", self.url)
    }
}

struct UserRepository {
    db: Arc<Database>,
}

impl UserRepository {
    fn find_user(&self, id: u64) -> String {
        self.db.query(&format!("SELECT * FROM users WHERE id = {id}"))
    }
}

struct UserService {
    repo: Arc<UserRepository>,
    logger: Arc<dyn Logger>,
}

impl UserService {
    fn get_user(&self, id: u64) -> String {
        self.logger.log(&format!("Getting user {id}"));
        self.repo.find_user(id)
    }
}

fn main() -> Result<()> {
    // Initialize tracing (logging)
    tracing_subscriber::fmt()
        .with_env_filter("mawsil=debug")
        .init();

    let container = Container::new();

    // Config — an existing value, shared
    container.instance(Config {
        database_url: "postgres://localhost/myapp".to_string(),
    })?;

    // Logger — singleton behind its trait key
    container.singleton_as::<dyn Logger, Arc<dyn Logger>, _>(|_| {
        Ok(Arc::new(ConsoleLogger) as Arc<dyn Logger>)
    })?;

    // Database — singleton, depends on Config + Logger
    container.singleton(|bcx: &mut BuildContext<'_>| {
        let config = bcx.make::<Config>()?;
        let logger = bcx.make_as::<dyn Logger, Arc<dyn Logger>>()?;
        Ok(Database {
            url: config.database_url.clone(),
            logger,
        })
    })?;

    // Repositories and services resolve through recipes instead
    container.register_recipe(
        TypeRecipe::of::<UserRepository>()
            .needs(Param::of::<Database>("db"))
            .constructed_by(|mut args| {
                Ok(UserRepository {
                    db: args.take::<Database>()?,
                })
            }),
    );
    container.register_recipe(
        TypeRecipe::of::<UserService>()
            .needs(Param::of::<UserRepository>("repo"))
            .needs(Param::of::<dyn Logger>("logger"))
            .constructed_by(|mut args| {
                Ok(UserService {
                    repo: args.take::<UserRepository>()?,
                    logger: args.take_cloned::<Arc<dyn Logger>>()?,
                })
            }),
    );

    // Resolve the whole graph
    let service = container.make::<UserService>()?;
    let user = service.get_user(42);
    println!("{user}");

    // Singletons are shared across resolutions
    let db_a = container.make::<Database>()?;
    let db_b = container.make::<Database>()?;
    assert!(Arc::ptr_eq(&db_a, &db_b));

    Ok(())
}
