//! Drives the full HTTP surface: axum router, tower-http layers, dispatch
//! pipeline, interceptor chains and the memory engine.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use seatline_server::network::middleware::REQUEST_ID_HEADER;
use seatline_server::network::ShutdownController;
use seatline_server::service::domain::{build_route_table, tickets};
use seatline_server::service::{build_dispatch_pipeline, Dispatcher};
use seatline_server::storage::engines::MemoryEngine;
use seatline_server::storage::PersistenceBoundary;
use seatline_server::{HallConfig, NetworkModule, SeatlineConfig};

struct TestServer {
    router: Router,
    shutdown: Arc<ShutdownController>,
    boundary: Arc<PersistenceBoundary>,
}

async fn server() -> TestServer {
    let config = SeatlineConfig {
        hall: HallConfig {
            default_hall_id: "main".to_string(),
            rows: 3,
            cols: 3,
        },
        ..SeatlineConfig::default()
    };
    let boundary = Arc::new(PersistenceBoundary::new(Arc::new(MemoryEngine::new())));
    tickets::seed_hall(&boundary, "main", 3, 3).await.unwrap();

    let routes = build_route_table(&config).unwrap();
    let dispatcher = Dispatcher::new(routes, Arc::clone(&boundary), &config.dispatch);
    let pipeline = build_dispatch_pipeline(dispatcher, &config.dispatch);
    let module = NetworkModule::new(config.network.clone(), pipeline, Arc::clone(&boundary));

    TestServer {
        router: module.build_router(),
        shutdown: module.shutdown_controller(),
        boundary,
    }
}

async fn ready_server() -> TestServer {
    let server = server().await;
    server.shutdown.set_ready();
    server
}

impl TestServer {
    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let body = body.map_or_else(Body::empty, |v| Body::from(v.to_string()));
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoints_bypass_dispatch() {
    let server = server().await;

    let response = server.send(Method::GET, "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let health = json_body(response).await;
    assert_eq!(health["state"], "starting");
    assert_eq!(health["storage"]["engine"], "memory");

    let response = server.send(Method::GET, "/health/ready", None).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    server.shutdown.set_ready();
    let response = server.send(Method::GET, "/health/ready", None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn dispatch_refused_before_ready() {
    let server = server().await;
    let response = server.send(Method::GET, "/items/a", None).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(server.boundary.stats().begun, 0);
}

#[tokio::test]
async fn absent_item_is_not_found() {
    let server = ready_server().await;
    let response = server.send(Method::GET, "/items/42", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "not_found");
}

#[tokio::test]
async fn empty_body_fails_validation_without_opening_a_unit() {
    let server = ready_server().await;
    let response = server.send(Method::POST, "/items", None).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    let body = json_body(response).await;
    assert_eq!(body["error"], "validation_failure");
    assert_eq!(body["message"], "request body must not be empty");
    assert_eq!(server.boundary.stats().begun, 0);
}

#[tokio::test]
async fn caller_request_id_is_echoed() {
    let server = ready_server().await;
    let id = "6f1c2a1e-2d4b-4c55-9a0e-0f3c5b7d9e11";
    let request = Request::builder()
        .uri("/items/nope")
        .header(REQUEST_ID_HEADER, id)
        .body(Body::empty())
        .unwrap();

    let response = server.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers()[REQUEST_ID_HEADER], id);
}

#[tokio::test]
async fn item_lifecycle_round_trips_through_storage() {
    let server = ready_server().await;

    let response = server
        .send(Method::POST, "/items", Some(json!({"id": "a", "value": 1})))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = server
        .send(Method::POST, "/items", Some(json!({"id": "a", "value": 2})))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({"id": "a", "value": 2, "version": 2})
    );

    let response = server.send(Method::GET, "/items/a", None).await;
    assert_eq!(json_body(response).await["value"], 2);

    let response = server.send(Method::DELETE, "/items/a", None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = server.send(Method::GET, "/items/a", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Recreating after a delete never reuses a version.
    let response = server
        .send(Method::POST, "/items", Some(json!({"id": "a", "value": 3})))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(json_body(response).await["version"], 3);
}

#[tokio::test]
async fn item_ids_with_reserved_characters_are_reachable_by_encoded_path() {
    let server = ready_server().await;

    let response = server
        .send(Method::POST, "/items", Some(json!({"id": "a b", "value": 1})))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = server.send(Method::GET, "/items/a%20b", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({"id": "a b", "value": 1, "version": 1})
    );

    let response = server.send(Method::DELETE, "/items/a%20b", None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn tickets_fill_the_default_hall_until_sold_out() {
    let server = ready_server().await;

    let first = server.send(Method::POST, "/ticket", None).await;
    assert_eq!(first.status(), StatusCode::CREATED);
    assert_eq!(
        json_body(first).await,
        json!({"row": 1, "column": 1, "distanceToCenter": 0})
    );

    // With the centre taken only the four corners keep a free neighbourhood.
    for _ in 0..4 {
        let response = server.send(Method::POST, "/ticket", None).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(json_body(response).await["distanceToCenter"], 2);
    }

    let sold_out = server.send(Method::POST, "/ticket", None).await;
    assert_eq!(sold_out.status(), StatusCode::CONFLICT);
    let body = json_body(sold_out).await;
    assert_eq!(body["error"], "rejected");
    assert_eq!(body["message"], "hall is sold out");

    let hall = server.send(Method::GET, "/halls/main", None).await;
    assert_eq!(json_body(hall).await["reserved"], 5);

    let seat = server.send(Method::GET, "/halls/main/seats/1/1", None).await;
    assert_eq!(seat.status(), StatusCode::OK);
    assert_eq!(json_body(seat).await["reserved"], true);
}

#[tokio::test]
async fn halls_can_be_created_and_booked_by_preference() {
    let server = ready_server().await;

    let created = server
        .send(
            Method::POST,
            "/halls",
            Some(json!({"id": "small", "rows": 4, "cols": 4})),
        )
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);

    let duplicate = server
        .send(
            Method::POST,
            "/halls",
            Some(json!({"id": "small", "rows": 4, "cols": 4})),
        )
        .await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let preferred = server
        .send(
            Method::POST,
            "/halls/small/tickets",
            Some(json!({"row": 0, "column": 3})),
        )
        .await;
    assert_eq!(preferred.status(), StatusCode::CREATED);
    let seat = json_body(preferred).await;
    assert_eq!((seat["row"].clone(), seat["column"].clone()), (json!(0), json!(3)));

    let outside = server
        .send(
            Method::POST,
            "/halls/small/tickets",
            Some(json!({"row": 9, "column": 9})),
        )
        .await;
    assert_eq!(outside.status(), StatusCode::BAD_REQUEST);

    let unknown = server.send(Method::POST, "/halls/nope/tickets", None).await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}
