//! Pre-only request body validation.

use async_trait::async_trait;
use serde::de::IgnoredAny;

use crate::service::chain::{Flow, Interceptor};
use crate::service::context::InvocationContext;
use crate::service::operation::{OperationError, Outcome};

fn is_blank(body: &[u8]) -> bool {
    body.iter().all(u8::is_ascii_whitespace)
}

/// Rejects empty or whitespace-only bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonEmptyBodyInterceptor;

#[async_trait]
impl Interceptor for NonEmptyBodyInterceptor {
    fn name(&self) -> &'static str {
        "non_empty_body"
    }

    async fn before(&self, ctx: &mut InvocationContext) -> Result<Flow, OperationError> {
        if is_blank(ctx.body()) {
            return Ok(Flow::Respond(Outcome::invalid("request body must not be empty")));
        }
        Ok(Flow::Continue)
    }
}

/// Rejects non-empty bodies that are not valid JSON. Empty bodies pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBodyInterceptor;

#[async_trait]
impl Interceptor for JsonBodyInterceptor {
    fn name(&self) -> &'static str {
        "json_body"
    }

    async fn before(&self, ctx: &mut InvocationContext) -> Result<Flow, OperationError> {
        if is_blank(ctx.body()) {
            return Ok(Flow::Continue);
        }
        match serde_json::from_slice::<IgnoredAny>(ctx.body()) {
            Ok(_) => Ok(Flow::Continue),
            Err(err) => Ok(Flow::Respond(Outcome::invalid(format!(
                "request body is not valid JSON: {err}"
            )))),
        }
    }
}
