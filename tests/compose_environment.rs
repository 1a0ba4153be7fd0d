//! Compose environments driven through the recording engine.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use testenv::compose::{ComposeEngine, ComposeOp, RecordingComposeEngine};
use testenv::container::StartedContainer;
use testenv::runtime::{RecordingRuntime, RuntimeOp};
use testenv::wait::WaitStrategy;
use testenv::{
    ComposeBuilder, ContainerBuilder, ContainerService, CustomService, Error, ErrorKind, Result,
    ServiceDescriptor, Settings,
};

#[derive(Debug, Clone, PartialEq)]
struct PostgresInfo {
    host: String,
    container: String,
    database: String,
}

struct Postgres;

#[async_trait]
impl ServiceDescriptor for Postgres {
    type ConnectionInfo = PostgresInfo;

    fn container(&self) -> ContainerBuilder {
        ContainerBuilder::new("postgres:16-alpine").with_exposed_port(5432)
    }

    async fn connection_info(&self, container: &StartedContainer) -> Result<PostgresInfo> {
        Ok(PostgresInfo {
            host: container.host().to_string(),
            container: container.name().to_string(),
            database: "app".into(),
        })
    }

    fn environment(&self) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::from([
            ("POSTGRES_DB".into(), "app".into()),
            ("POSTGRES_PORT".into(), "5432".into()),
        ]))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct RedisInfo {
    url: String,
}

struct Redis;

#[async_trait]
impl ServiceDescriptor for Redis {
    type ConnectionInfo = RedisInfo;

    fn container(&self) -> ContainerBuilder {
        ContainerBuilder::new("redis:7-alpine").with_exposed_port(6379)
    }

    async fn connection_info(&self, container: &StartedContainer) -> Result<RedisInfo> {
        Ok(RedisInfo {
            url: format!("redis://{}/0", container.name()),
        })
    }

    fn wait_strategy(&self) -> Result<Option<WaitStrategy>> {
        Ok(Some(WaitStrategy::log_text("Ready to accept connections")?))
    }
}

/// Service whose `stop` can be scripted to fail; records every stop.
struct ScriptedService {
    name: String,
    fail_stop: bool,
    stopped: Arc<Mutex<Vec<String>>>,
    bound: Mutex<Option<StartedContainer>>,
}

impl ScriptedService {
    fn new(name: &str, fail_stop: bool, stopped: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            fail_stop,
            stopped: stopped.clone(),
            bound: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ContainerService for ScriptedService {
    type ConnectionInfo = String;

    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stopped.lock().unwrap().push(self.name.clone());
        self.bound.lock().unwrap().take();
        if self.fail_stop {
            return Err(Error::cleanup_failed(format!("{} refused to stop", self.name)));
        }
        Ok(())
    }

    async fn is_started(&self) -> bool {
        self.bound.lock().unwrap().is_some()
    }

    async fn connection_info(&self) -> Result<String> {
        match self.bound.lock().unwrap().as_ref() {
            Some(container) => Ok(container.id().to_string()),
            None => Err(Error::not_started("connection_info")),
        }
    }

    async fn initialize_from_container(&self, container: StartedContainer) -> Result<()> {
        *self.bound.lock().unwrap() = Some(container);
        Ok(())
    }
}

fn environment(services: &[&str]) -> (Arc<RecordingRuntime>, Arc<RecordingComposeEngine>) {
    let runtime = Arc::new(RecordingRuntime::new());
    runtime.set_logs("Ready to accept connections\n");
    let engine = Arc::new(RecordingComposeEngine::new(
        runtime.clone(),
        services.iter().copied(),
    ));
    (runtime, engine)
}

fn builder(engine: &Arc<RecordingComposeEngine>) -> ComposeBuilder {
    testenv::logging::init_test_tracing();
    ComposeBuilder::new("/srv/shop", "docker-compose.yml")
        .with_engine(engine.clone())
        .with_settings(Settings {
            poll_interval_ms: 10,
            ..Settings::default()
        })
        .with_project_name("shop")
}

#[tokio::test]
async fn test_connection_info_for_every_service() {
    let (_runtime, engine) = environment(&["db", "cache", "worker"]);

    let env = builder(&engine)
        .with_service("db", CustomService::new("postgres", Postgres))
        .with_service("cache", CustomService::new("redis", Redis))
        .start()
        .await
        .unwrap();

    let infos = env.connection_infos();
    assert_eq!(infos.names(), vec!["cache", "db"]);

    let db = env.connection_info::<CustomService<Postgres>>("db").unwrap();
    assert_eq!(db.host, "localhost");
    assert_eq!(db.container, "db");
    assert_eq!(db.database, "app");

    let cache = env.connection_info::<CustomService<Redis>>("cache").unwrap();
    assert_eq!(cache.url, "redis://cache/0");

    let err = env
        .connection_info::<CustomService<Redis>>("db")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert_eq!(env.network(), "shop_default");
    assert_eq!(
        env.defined_services().await.unwrap(),
        vec!["db", "cache", "worker"]
    );

    let service = env.service::<CustomService<Postgres>>("db").unwrap();
    assert!(service.is_started().await);

    env.cleanup().await.unwrap();
    assert!(!service.is_started().await);
}

#[tokio::test]
async fn test_unknown_service_names_registered_ones() {
    let (_runtime, engine) = environment(&["db", "cache"]);
    let env = builder(&engine)
        .with_service("db", CustomService::new("postgres", Postgres))
        .with_service("cache", CustomService::new("redis", Redis))
        .start()
        .await
        .unwrap();

    let err = env.get_container("ghost").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceNotFound);
    assert!(err.is(ErrorKind::Compose));
    assert_eq!(err.context()["service_name"], "ghost");
    assert_eq!(
        err.context()["available_services"],
        serde_json::json!(["db", "cache"])
    );

    let db = env.get_container("db").await.unwrap();
    assert_eq!(db.name(), "db");
    assert!(db.is_running().await.unwrap());

    env.cleanup().await.unwrap();
    let err = env.get_container("db").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotStarted);
    assert_eq!(err.context()["operation"], "get_container");
}

#[tokio::test]
async fn test_cleanup_stops_every_service_despite_failures() {
    let (runtime, engine) = environment(&["a", "b", "c"]);
    let stopped = Arc::new(Mutex::new(Vec::new()));

    let env = builder(&engine)
        .with_service("a", ScriptedService::new("a", false, &stopped))
        .with_service("b", ScriptedService::new("b", true, &stopped))
        .with_service("c", ScriptedService::new("c", false, &stopped))
        .start()
        .await
        .unwrap();

    let err = env.cleanup().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CleanupFailed);
    assert_eq!(*stopped.lock().unwrap(), vec!["c", "b", "a"]);
    assert_eq!(engine.ops().last(), Some(&ComposeOp::Down));

    let removals = runtime
        .ops()
        .into_iter()
        .filter(|op| *op == RuntimeOp::RemoveContainer)
        .count();
    assert_eq!(removals, 3);

    env.cleanup().await.unwrap();
    assert_eq!(stopped.lock().unwrap().len(), 3);
    let downs = engine
        .ops()
        .into_iter()
        .filter(|op| *op == ComposeOp::Down)
        .count();
    assert_eq!(downs, 1);
}

#[tokio::test]
async fn test_duplicate_registration_is_rejected() {
    let (_runtime, engine) = environment(&["db"]);
    let stopped = Arc::new(Mutex::new(Vec::new()));

    let err = builder(&engine)
        .with_service("db", ScriptedService::new("first", false, &stopped))
        .with_service("db", ScriptedService::new("second", false, &stopped))
        .start()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidValue);
    assert_eq!(err.context()["value"], "db");
    assert!(engine.ops().is_empty());
}

#[tokio::test]
async fn test_hooks_feed_the_definition() {
    let (_runtime, engine) = environment(&["db", "cache"]);

    let env = builder(&engine)
        .with_env("POSTGRES_DB", "override")
        .with_service("db", CustomService::new("postgres", Postgres))
        .with_service("cache", CustomService::new("redis", Redis))
        .start()
        .await
        .unwrap();

    let definitions = engine.definitions();
    let definition = &definitions[0];
    assert_eq!(definition.environment()["POSTGRES_DB"], "override");
    assert_eq!(definition.environment()["POSTGRES_PORT"], "5432");
    assert!(definition.wait_strategies().contains_key("cache"));
    assert!(!definition.wait_strategies().contains_key("db"));

    env.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_up_failure_is_compose_start_error() {
    let (_runtime, engine) = environment(&["db"]);
    engine.fail(ComposeOp::Up, "port is already allocated");

    let err = builder(&engine)
        .with_service("db", CustomService::new("postgres", Postgres))
        .start()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ComposeStartFailed);
    assert_eq!(err.context()["compose_file"], "docker-compose.yml");
    assert!(err.to_string().contains("docker-compose.yml"));
}

#[tokio::test]
async fn test_missing_container_tears_environment_down() {
    let (_runtime, engine) = environment(&["db", "cache"]);
    engine.without_container("cache");

    let err = builder(&engine)
        .with_service("db", CustomService::new("postgres", Postgres))
        .with_service("cache", CustomService::new("redis", Redis))
        .start()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServiceNotFound);
    assert_eq!(err.context()["service_name"], "cache");
    assert!(engine.ops().contains(&ComposeOp::Down));
}

#[tokio::test]
async fn test_engine_is_usable_as_trait_object() {
    let (_runtime, engine) = environment(&["db"]);
    let dynamic: Arc<dyn ComposeEngine> = engine.clone();

    let env = ComposeBuilder::new("/srv/shop", "docker-compose.yml")
        .with_engine(dynamic)
        .with_settings(Settings::default())
        .start()
        .await
        .unwrap();

    assert_eq!(env.network(), "shop_default");
    env.cleanup().await.unwrap();
}
