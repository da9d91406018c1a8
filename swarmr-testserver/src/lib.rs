//! Mock e-commerce target for engine tests: a catalog, orders, shops,
//! reviews, and a media upload endpoint, with counters the tests assert on.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub const PATH_PRODUCTS: &str = "/api/products";
pub const PATH_PRODUCT_DETAIL: &str = "/api/products/{id}";
pub const PATH_ORDERS: &str = "/api/orders";
pub const PATH_ACTIVE_SHOPS: &str = "/api/v1/shops/active";
pub const PATH_PRODUCT_REVIEWS: &str = "/api/v1/reviews/product/{id}";
pub const PATH_MEDIA_UPLOAD: &str = "/api/v1/media/upload";

/// The only product id the mock catalog knows; every other id is a 404.
pub const KNOWN_PRODUCT_ID: &str = "1";

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    orders_created: Arc<AtomicU64>,
    uploads_received: Arc<AtomicU64>,
    bad_requests: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc_requests_total(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_orders_created(&self) {
        self.orders_created.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_uploads_received(&self) {
        self.uploads_received.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_bad_requests(&self) {
        self.bad_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn orders_created(&self) -> u64 {
        self.orders_created.load(Ordering::Relaxed)
    }

    pub fn uploads_received(&self) -> u64 {
        self.uploads_received.load(Ordering::Relaxed)
    }

    pub fn bad_requests(&self) -> u64 {
        self.bad_requests.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Serialize)]
struct Product {
    id: String,
    name: String,
    price_cents: i64,
}

async fn handle_products(State(stats): State<TestServerStats>) -> (StatusCode, Bytes) {
    stats.inc_requests_total();

    let products = vec![
        Product {
            id: KNOWN_PRODUCT_ID.to_string(),
            name: "aluminium widget".to_string(),
            price_cents: 1299,
        },
        Product {
            id: "2".to_string(),
            name: "brass widget".to_string(),
            price_cents: 2499,
        },
    ];

    json_response(StatusCode::OK, &products)
}

async fn handle_product_detail(
    State(stats): State<TestServerStats>,
    Path(id): Path<String>,
) -> (StatusCode, Bytes) {
    stats.inc_requests_total();

    if id != KNOWN_PRODUCT_ID && id != "2" {
        return (StatusCode::NOT_FOUND, Bytes::from_static(b"{}"));
    }

    json_response(
        StatusCode::OK,
        &Product {
            id,
            name: "aluminium widget".to_string(),
            price_cents: 1299,
        },
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderRequest {
    user_id: String,
    order_items: Vec<OrderItem>,
    shipping_address: String,
    city: String,
    zip_code: String,
    phone_number: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderItem {
    product_id: String,
    quantity: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
    status: &'static str,
}

async fn handle_orders(
    State(stats): State<TestServerStats>,
    body: Bytes,
) -> (StatusCode, Bytes) {
    stats.inc_requests_total();

    let order: OrderRequest = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => {
            stats.inc_bad_requests();
            return (StatusCode::BAD_REQUEST, Bytes::from_static(b"bad json"));
        }
    };

    if order.user_id.is_empty()
        || order.order_items.is_empty()
        || order.order_items.iter().any(|item| item.quantity == 0)
        || order.shipping_address.is_empty()
        || order.city.is_empty()
        || order.zip_code.is_empty()
        || order.phone_number.is_empty()
    {
        stats.inc_bad_requests();
        return (
            StatusCode::BAD_REQUEST,
            Bytes::from_static(b"missing fields"),
        );
    }

    if order
        .order_items
        .iter()
        .any(|item| item.product_id != KNOWN_PRODUCT_ID && item.product_id != "2")
    {
        return (
            StatusCode::NOT_FOUND,
            Bytes::from_static(b"unknown product"),
        );
    }

    stats.inc_orders_created();
    let order_id = stats.orders_created();
    json_response(
        StatusCode::CREATED,
        &OrderResponse {
            order_id,
            status: "CREATED",
        },
    )
}

#[derive(Debug, Serialize)]
struct ShopPage {
    page: u64,
    size: u64,
    shops: Vec<String>,
}

async fn handle_active_shops(
    State(stats): State<TestServerStats>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Bytes) {
    stats.inc_requests_total();

    let page = query
        .get("page")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    let size = query
        .get("size")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(20);

    json_response(
        StatusCode::OK,
        &ShopPage {
            page,
            size,
            shops: vec!["central".to_string(), "harbor".to_string()],
        },
    )
}

async fn handle_product_reviews(
    State(stats): State<TestServerStats>,
    Path(id): Path<String>,
) -> (StatusCode, Bytes) {
    stats.inc_requests_total();

    if id == KNOWN_PRODUCT_ID {
        (StatusCode::OK, Bytes::from_static(b"[]"))
    } else {
        (StatusCode::NOT_FOUND, Bytes::from_static(b"{}"))
    }
}

async fn handle_media_upload(
    State(stats): State<TestServerStats>,
    mut multipart: Multipart,
) -> StatusCode {
    stats.inc_requests_total();

    let mut saw_file = false;
    let mut saw_uploaded_by = false;

    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name() {
            Some("file") => {
                if field.bytes().await.is_ok_and(|b| !b.is_empty()) {
                    saw_file = true;
                }
            }
            Some("uploadedBy") => {
                if field.text().await.is_ok_and(|t| !t.is_empty()) {
                    saw_uploaded_by = true;
                }
            }
            _ => {}
        }
    }

    if saw_file && saw_uploaded_by {
        stats.inc_uploads_received();
        StatusCode::CREATED
    } else {
        stats.inc_bad_requests();
        StatusCode::BAD_REQUEST
    }
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> (StatusCode, Bytes) {
    match serde_json::to_vec(value) {
        Ok(bytes) => (status, Bytes::from(bytes)),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Bytes::from_static(b"encode error"),
        ),
    }
}

pub fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_PRODUCTS, get(handle_products))
        .route(PATH_PRODUCT_DETAIL, get(handle_product_detail))
        .route(PATH_ORDERS, post(handle_orders))
        .route(PATH_ACTIVE_SHOPS, get(handle_active_shops))
        .route(PATH_PRODUCT_REVIEWS, get(handle_product_reviews))
        .route(PATH_MEDIA_UPLOAD, post(handle_media_upload))
        .with_state(stats)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
