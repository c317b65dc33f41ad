#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::util::ServiceExt;
use uuid::Uuid;

use checkout_api::{
    config::AppConfig,
    db::{self, DbConfig},
    entities::{order, product},
    events::{self, EventSender},
    gateway::{CaptureOutcome, GatewayError, PaymentGateway, PaymentSession},
    AppServices, AppState,
};

/// Test double for the payment provider. Failures are queued per call;
/// counters record how often the core actually reached the boundary.
#[derive(Default)]
pub struct StubGateway {
    create_failures: Mutex<VecDeque<GatewayError>>,
    capture_failures: Mutex<VecDeque<GatewayError>>,
    decline_next: AtomicBool,
    create_calls: AtomicUsize,
    capture_calls: AtomicUsize,
}

impl StubGateway {
    pub fn queue_create_failure(&self, err: GatewayError) {
        self.create_failures.lock().unwrap().push_back(err);
    }

    pub fn queue_capture_failure(&self, err: GatewayError) {
        self.capture_failures.lock().unwrap().push_back(err);
    }

    pub fn decline_next_capture(&self) {
        self.decline_next.store(true, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn capture_calls(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_session(
        &self,
        order: &order::Model,
        _items: &[checkout_api::entities::order_item::Model],
    ) -> Result<PaymentSession, GatewayError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.create_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        Ok(PaymentSession {
            session_ref: format!("PAY-{}", order.id.simple()),
            redirect_url: format!("https://gateway.test/approve/{}", order.id),
        })
    }

    async fn capture(
        &self,
        session_ref: &str,
        _payer_ref: &str,
    ) -> Result<CaptureOutcome, GatewayError> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.capture_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        if self.decline_next.swap(false, Ordering::SeqCst) {
            return Ok(CaptureOutcome {
                success: false,
                transaction_id: None,
                decline_reason: Some("INSTRUMENT_DECLINED".to_string()),
            });
        }

        Ok(CaptureOutcome {
            success: true,
            transaction_id: Some(format!("TXN-{}", session_ref)),
            decline_reason: None,
        })
    }
}

/// Helper harness backed by an in-memory SQLite database and a stub gateway.
pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub gateway: Arc<StubGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:", "127.0.0.1", 0, "test");
        // Keep retry backoff out of test wall-clock time.
        cfg.gateway.retry_attempts = 2;
        cfg.gateway.retry_base_delay_ms = 1;

        // A single connection so every query sees the same in-memory database.
        let pool = db::establish_connection_with_config(&DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(5),
        })
        .await
        .expect("failed to create test database");

        db::ensure_schema(&pool)
            .await
            .expect("failed to create test schema");

        let db = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let cfg = Arc::new(cfg);
        let gateway = Arc::new(StubGateway::default());
        let services = AppServices::build(
            db.clone(),
            event_sender.clone(),
            cfg.clone(),
            gateway.clone(),
        );

        let state = AppState {
            db,
            config: cfg,
            event_sender,
            services,
        };
        let router = checkout_api::app_router(state.clone());

        Self {
            state,
            router,
            gateway,
            _event_task: event_task,
        }
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> Uuid {
        let product_id = Uuid::new_v4();
        let now = Utc::now();

        product::ActiveModel {
            id: Set(product_id),
            name: Set(name.to_string()),
            price: Set(price),
            stock: Set(stock),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed product");

        product_id
    }

    pub async fn add_cart_item(&self, user_id: Uuid, product_id: Uuid, quantity: i32) {
        self.state
            .services
            .cart
            .add_item(user_id, product_id, quantity)
            .await
            .expect("failed to add cart item");
    }

    /// Rewrites an order's creation time, for exercising TTL behavior.
    pub async fn backdate_order(&self, order_id: Uuid, seconds: i64) {
        let existing = order::Entity::find_by_id(order_id)
            .one(&*self.state.db)
            .await
            .expect("failed to load order")
            .expect("order missing");

        let mut model: order::ActiveModel = existing.into();
        model.created_at = Set(Utc::now() - chrono::Duration::seconds(seconds));
        model
            .update(&*self.state.db)
            .await
            .expect("failed to backdate order");
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed")
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn return_params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}
