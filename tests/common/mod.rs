use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use http_body_util::BodyExt;
use lifted::auth::jwt::JwtService;
use lifted::config::AppConfig;
use lifted::db::{self, PgPool};
use lifted::models::{NewCard, NewMessageGroup, NewUser};
use lifted::render::{DeckRenderer, ProgressSender, SlideContent, TextDeckRenderer};
use lifted::routes;
use lifted::state::AppState;
use lifted::storage::ObjectStorage;
use lifted::{allocator, jobs, settings, workers};
use once_cell::sync::Lazy;
use serde::Serialize;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()> {
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type,
            content_disposition,
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let guard = self.objects.lock().await;
        guard
            .get(key)
            .map(|obj| obj.bytes.clone())
            .ok_or_else(|| anyhow!("object {key} missing"))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let mut guard = self.objects.lock().await;
        guard.remove(key);
        Ok(())
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }
}

/// Delegates to the text renderer, with a switch that makes deck rendering
/// fail so tests can exercise the failure-isolation path.
pub struct FakeRenderer {
    inner: TextDeckRenderer,
    fail_deck: AtomicBool,
}

impl Default for FakeRenderer {
    fn default() -> Self {
        Self {
            inner: TextDeckRenderer::new(),
            fail_deck: AtomicBool::new(false),
        }
    }
}

impl FakeRenderer {
    #[allow(dead_code)]
    pub fn set_fail_deck(&self, fail: bool) {
        self.fail_deck.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeckRenderer for FakeRenderer {
    async fn render_deck(
        &self,
        template: &[u8],
        slides: &[SlideContent],
        progress: ProgressSender,
    ) -> Result<Vec<u8>> {
        if self.fail_deck.load(Ordering::SeqCst) {
            bail!("scripted deck failure");
        }
        self.inner.render_deck(template, slides, progress).await
    }

    async fn deck_to_document(&self, deck: &[u8]) -> Result<Vec<u8>> {
        self.inner.deck_to_document(deck).await
    }

    fn deck_content_type(&self) -> &'static str {
        self.inner.deck_content_type()
    }

    fn document_content_type(&self) -> &'static str {
        self.inner.document_content_type()
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
    renderer: Arc<FakeRenderer>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            s3_bucket: "test-bucket".to_string(),
            worker_poll_seconds: 1,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let renderer = Arc::new(FakeRenderer::default());
        let renderer_for_state: Arc<dyn DeckRenderer> = renderer.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool.clone(), config, storage_for_state, renderer_for_state, jwt);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            storage,
            renderer,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    #[allow(dead_code)]
    pub fn renderer(&self) -> Arc<FakeRenderer> {
        self.renderer.clone()
    }

    pub async fn insert_user(&self, username: &str, password: &str, role: &str) -> Result<Uuid> {
        let username = username.to_string();
        let password = password.to_string();
        let role = role.to_string();
        self.with_conn(move |conn| {
            let password_hash = lifted::auth::password::hash_password(&password)?;
            let user = NewUser {
                id: Uuid::new_v4(),
                username,
                password_hash,
                role,
            };
            diesel::insert_into(lifted::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    pub async fn insert_group(
        &self,
        slug: &str,
        display_name: &str,
        hide_cards: bool,
    ) -> Result<Uuid> {
        let slug = slug.to_string();
        let display_name = display_name.to_string();
        self.with_conn(move |conn| {
            let group = NewMessageGroup {
                id: Uuid::new_v4(),
                slug,
                display_name,
                hide_cards,
            };
            diesel::insert_into(lifted::schema::message_groups::table)
                .values(&group)
                .execute(conn)
                .context("failed to insert group")?;
            Ok(group.id)
        })
        .await
    }

    pub async fn insert_attachment(
        &self,
        group_id: Uuid,
        name: &str,
        capacity: i32,
    ) -> Result<Uuid> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let attachment = allocator::add_attachment(conn, group_id, &name, capacity)
                .map_err(|err| anyhow!("failed to insert attachment: {err}"))?;
            Ok(attachment.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_card(
        &self,
        group_id: Uuid,
        sender_email: &str,
        recipient_email: &str,
        recipient_name: &str,
        body: &str,
    ) -> Result<Uuid> {
        let sender_email = sender_email.to_string();
        let recipient_email = recipient_email.to_string();
        let recipient_name = recipient_name.to_string();
        let body = body.to_string();
        self.with_conn(move |conn| {
            let card = NewCard {
                id: Uuid::new_v4(),
                message_group_id: group_id,
                sender_email,
                sender_name: "Test Sender".to_string(),
                recipient_email,
                recipient_name,
                body,
            };
            diesel::insert_into(lifted::schema::cards::table)
                .values(&card)
                .execute(conn)
                .context("failed to insert card")?;
            Ok(card.id)
        })
        .await
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| {
            settings::set(conn, &key, &value).context("failed to set setting")
        })
        .await
    }

    /// Reserves one queued run and executes it to completion, the way the
    /// worker loop would.
    #[allow(dead_code)]
    pub async fn run_worker_once(&self) -> Result<bool> {
        let run_opt = self
            .with_conn(|conn| jobs::reserve_run(conn).map_err(|err| anyhow!("{err}")))
            .await?;

        let Some(run) = run_opt else {
            return Ok(false);
        };

        let state = Arc::new(self.state.clone());
        if let Err(err) = workers::fulfillment::execute(state, &run).await {
            self.with_conn(move |conn| {
                jobs::fail_run(conn, run.id, &err.to_string()).map_err(|err| anyhow!("{err}"))
            })
            .await?;
        }
        Ok(true)
    }

    pub async fn login_token(&self, username: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            username: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json(
                "/api/auth/login",
                &LoginPayload { username, password },
                None,
            )
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = body_to_vec(response.into_body()).await?;
        #[derive(serde::Deserialize)]
        struct LoginResponse {
            access_token: String,
        }
        let parsed: LoginResponse = serde_json::from_slice(&body)?;
        Ok(parsed.access_token)
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(Method::PATCH)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn put_bytes(
        &self,
        path: &str,
        bytes: Vec<u8>,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder()
            .method(Method::PUT)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(bytes))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn body_to_json(body: Body) -> Result<serde_json::Value> {
    let bytes = body_to_vec(body).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE artifacts, attachment_claims, attachments, cards, fulfillment_jobs, \
         swap_preferences, visibility_overrides, settings, message_groups, users \
         RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
