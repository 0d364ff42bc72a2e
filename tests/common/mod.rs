#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use uuid::Uuid;

use content_queue::Settings;
use content_queue::db::{MemoryStore, QueueStore};
use content_queue::error::JobError;
use content_queue::models::{NewQueueEntry, QueueEntry};
use content_queue::orchestrator::Orchestrator;
use content_queue::pipeline::services::{
    Asset, AssetService, Assets, Collaborators, Configuration, ConfigurationProvider, Content,
    GenerationParams, GenerationService, Published, PublishingService, Section, Structure,
};
use content_queue::state::SharedState;

/// Collaborator calls the fakes can be scripted to fail or stall on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Configuration,
    Structure,
    Content,
    Assets,
    Publish,
}

/// Scripted stand-ins for the generation, asset, publishing and configuration services.
pub struct FakeServices {
    configuration: Mutex<Result<Configuration, JobError>>,
    failures: Mutex<HashMap<Call, VecDeque<JobError>>>,
    delays: Mutex<HashMap<Call, Duration>>,
    content_words: Mutex<VecDeque<usize>>,
    cancel_during_structure: Mutex<Option<(Arc<MemoryStore>, Uuid)>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeServices {
    pub fn new() -> Self {
        Self {
            configuration: Mutex::new(Ok(configuration())),
            failures: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            content_words: Mutex::new(VecDeque::new()),
            cancel_during_structure: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_configuration(&self, configuration: Result<Configuration, JobError>) {
        *self.configuration.lock().unwrap() = configuration;
    }

    /// Queue failures returned by successive calls to `call`.
    pub fn fail(&self, call: Call, errors: Vec<JobError>) {
        self.failures
            .lock()
            .unwrap()
            .entry(call)
            .or_default()
            .extend(errors);
    }

    pub fn delay(&self, call: Call, by: Duration) {
        self.delays.lock().unwrap().insert(call, by);
    }

    /// Word counts for successive generated bodies. Default is 100.
    pub fn content_words(&self, counts: Vec<usize>) {
        self.content_words.lock().unwrap().extend(counts);
    }

    pub fn cancel_during_structure(&self, store: Arc<MemoryStore>, id: Uuid) {
        *self.cancel_during_structure.lock().unwrap() = Some((store, id));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, call: Call) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    async fn enter(&self, call: Call) -> Result<(), JobError> {
        self.calls.lock().unwrap().push(call);
        let delay = self.delays.lock().unwrap().get(&call).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&call)
            .and_then(|q| q.pop_front());
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub fn configuration() -> Configuration {
    Configuration {
        id: Uuid::now_v7(),
        name: "blog".to_string(),
        enabled: true,
        target: json!({ "site": "https://blog.test", "api_key": "wp-key-1234567890" }),
        settings: json!({}),
    }
}

#[async_trait]
impl ConfigurationProvider for FakeServices {
    async fn get_configuration(&self, _configuration_id: Uuid) -> Result<Configuration, JobError> {
        self.enter(Call::Configuration).await?;
        self.configuration.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationService for FakeServices {
    async fn generate_structure(&self, params: &GenerationParams) -> Result<Structure, JobError> {
        let hook = self.cancel_during_structure.lock().unwrap().take();
        if let Some((store, id)) = hook {
            store.request_cancel(id).await.expect("cancel request");
        }
        self.enter(Call::Structure).await?;
        Ok(Structure {
            title: format!("All about {}", params.topic),
            sections: vec![
                Section {
                    heading: "Intro".to_string(),
                    summary: "Why it matters".to_string(),
                },
                Section {
                    heading: "Details".to_string(),
                    summary: "How it works".to_string(),
                },
            ],
        })
    }

    async fn generate_content(
        &self,
        structure: &Structure,
        _params: &GenerationParams,
    ) -> Result<Content, JobError> {
        self.enter(Call::Content).await?;
        let words = self.content_words.lock().unwrap().pop_front().unwrap_or(100);
        Ok(Content {
            title: structure.title.clone(),
            body: vec!["word"; words].join(" "),
            slug: None,
            excerpt: None,
            tags: Vec::new(),
        })
    }
}

#[async_trait]
impl AssetService for FakeServices {
    async fn generate_assets(&self, content: &Content) -> Result<Assets, JobError> {
        self.enter(Call::Assets).await?;
        Ok(Assets {
            items: vec![Asset {
                kind: "image".to_string(),
                url: format!("https://cdn.test/{}.png", content.title.len()),
                alt: Some(content.title.clone()),
                featured: true,
            }],
        })
    }
}

#[async_trait]
impl PublishingService for FakeServices {
    async fn publish(
        &self,
        content: &Content,
        _assets: &Assets,
        target: &Value,
    ) -> Result<Published, JobError> {
        self.enter(Call::Publish).await?;
        let slug = content.slug.clone().unwrap_or_default();
        Ok(Published {
            external_id: format!("post-{slug}"),
            url: format!("{}/{slug}", target["site"].as_str().unwrap_or("")),
        })
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub services: Arc<FakeServices>,
    pub state: SharedState,
}

impl Harness {
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.state.orchestrator
    }

    pub async fn enqueue(&self, payload: Value, priority: i32, max_attempts: i32) -> QueueEntry {
        self.orchestrator()
            .submit_entry(NewQueueEntry {
                configuration_id: Uuid::now_v7(),
                payload,
                priority,
                max_attempts,
            })
            .await
            .expect("enqueue")
    }

    pub async fn entry(&self, id: Uuid) -> QueueEntry {
        self.store
            .get_by_id(id)
            .await
            .expect("get_by_id")
            .expect("entry exists")
    }
}

pub fn harness() -> Harness {
    harness_with(Settings::default())
}

pub fn harness_with(settings: Settings) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let services = Arc::new(FakeServices::new());
    let collaborators = Collaborators {
        generation: services.clone(),
        assets: services.clone(),
        publishing: services.clone(),
        configurations: services.clone(),
    };
    let state = content_queue::build_state(store.clone(), collaborators, settings);
    Harness {
        store,
        services,
        state,
    }
}

pub fn payload() -> Value {
    json!({
        "topic": "async Rust",
        "target_word_count": 100,
        "keywords": ["rust", "tokio"]
    })
}

/// A running HTTP server over a harness.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub harness: Harness,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("get request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn post(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url(path))
            .send()
            .await
            .expect("post request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn delete(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .delete(self.url(path))
            .send()
            .await
            .expect("delete request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }
}

/// Serve the reporting surface on a random local port.
pub async fn spawn_app() -> TestApp {
    let harness = harness();
    let app = content_queue::build_app(harness.state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });

    TestApp {
        addr,
        client: Client::new(),
        harness,
    }
}

// ── Postgres ────────────────────────────────────────────────────

/// A migrated, throwaway database. Requires `DATABASE_URL`.
pub struct TestDb {
    pub store: content_queue::db::PgStore,
    pub db_name: String,
}

fn database_url(db: &str) -> String {
    let base_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");
    base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/{db}"))
        .unwrap_or_else(|| base_url.clone())
}

pub async fn spawn_db() -> TestDb {
    let _ = dotenvy::dotenv();

    let db_name = format!(
        "content_queue_test_{}",
        Uuid::now_v7().to_string().replace('-', "")
    );

    let admin_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url("postgres"))
        .await
        .expect("Failed to connect to postgres for test DB creation");

    sqlx::query(&format!("CREATE DATABASE \"{db_name}\""))
        .execute(&admin_pool)
        .await
        .expect("Failed to create test database");
    admin_pool.close().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url(&db_name))
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations on test database");

    TestDb {
        store: content_queue::db::PgStore::new(pool),
        db_name,
    }
}

/// Drop the test database.
pub async fn cleanup_db(db: TestDb) {
    db.store.pool().close().await;

    let admin_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url("postgres"))
        .await
        .expect("Failed to connect for cleanup");

    let _ = sqlx::query(&format!(
        "DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)",
        db.db_name
    ))
    .execute(&admin_pool)
    .await;

    admin_pool.close().await;
}
