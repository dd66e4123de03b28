//! Generic versioned items: `GET /items/{id}`, `POST /items`,
//! `DELETE /items/{id}`.
//!
//! Each item is one record under `item/<id>`. Writes are optimistic: a
//! `POST` commits only if the item is still at the version it read.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::service::context::InvocationContext;
use crate::service::interceptors::{JsonBodyInterceptor, NonEmptyBodyInterceptor};
use crate::service::operation::{Handler, OperationError, Outcome};
use crate::service::router::RouteSpec;
use crate::storage::Versioned;

fn item_key(id: &str) -> String {
    format!("item/{id}")
}

fn item_body(id: &str, value: Value, version: u64) -> Value {
    json!({ "id": id, "value": value, "version": version })
}

/// Route parameter `id`; the router never binds an empty segment.
fn id_param(ctx: &InvocationContext) -> String {
    ctx.param("id").unwrap_or_default().to_string()
}

#[derive(Debug, Deserialize)]
struct PutItemBody {
    id: String,
    value: Value,
}

struct GetItem;

#[async_trait]
impl Handler for GetItem {
    async fn call(&self, ctx: &mut InvocationContext) -> Result<Outcome, OperationError> {
        let id = id_param(ctx);
        Ok(match ctx.read(&item_key(&id)).await? {
            Some(Versioned { version, value }) => Outcome::ok(item_body(&id, value, version)),
            None => Outcome::not_found(format!("item {id} not found")),
        })
    }
}

struct PutItem;

#[async_trait]
impl Handler for PutItem {
    async fn call(&self, ctx: &mut InvocationContext) -> Result<Outcome, OperationError> {
        let body: PutItemBody = match ctx.json() {
            Ok(body) => body,
            Err(err) => return Ok(Outcome::invalid(format!("invalid item: {err}"))),
        };
        if body.id.is_empty() || body.id.contains('/') {
            return Ok(Outcome::invalid("item id must be a non-empty path segment"));
        }

        let key = item_key(&body.id);
        let observed = Versioned::version_of(ctx.read(&key).await?.as_ref());
        let version = ctx
            .write_expecting(&key, body.value.clone(), observed)
            .await?;

        let response = item_body(&body.id, body.value, version);
        Ok(if observed == 0 {
            Outcome::created(response)
        } else {
            Outcome::ok(response)
        })
    }
}

struct DeleteItem;

#[async_trait]
impl Handler for DeleteItem {
    async fn call(&self, ctx: &mut InvocationContext) -> Result<Outcome, OperationError> {
        let id = id_param(ctx);
        Ok(if ctx.delete(&item_key(&id)).await? {
            Outcome::no_content()
        } else {
            Outcome::not_found(format!("item {id} not found"))
        })
    }
}

#[must_use]
pub fn get_item() -> RouteSpec {
    RouteSpec::get("/items/{id}", GetItem).transactional()
}

#[must_use]
pub fn put_item() -> RouteSpec {
    RouteSpec::post("/items", PutItem)
        .intercept(NonEmptyBodyInterceptor)
        .intercept(JsonBodyInterceptor)
        .transactional()
}

#[must_use]
pub fn delete_item() -> RouteSpec {
    RouteSpec::delete("/items/{id}", DeleteItem).transactional()
}

/// Every item route.
#[must_use]
pub fn routes() -> Vec<RouteSpec> {
    vec![get_item(), put_item(), delete_item()]
}
