//! Per-request invocation context threaded through the interception chain.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use bytes::Bytes;
use http::{Extensions, HeaderMap, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;
use uuid::Uuid;

use super::operation::{OperationError, RequestState};
use crate::storage::{
    ChangeOp, ChangeResult, PersistenceBoundary, PersistenceError, UnitOfWork, Versioned,
};

/// Mutable state of a single invocation.
///
/// Owned by one dispatch; never shared between requests. Interceptors keep
/// their per-request data in the typed attribute map. Dropping a context
/// whose unit of work is still active rolls that unit back and logs a
/// warning.
pub struct InvocationContext {
    request_id: Uuid,
    method: Method,
    path: String,
    route: String,
    headers: HeaderMap,
    body: Bytes,
    params: HashMap<String, String>,
    attributes: Extensions,
    unit: Option<UnitOfWork>,
    boundary: Arc<PersistenceBoundary>,
    attempt: u32,
    state: RequestState,
    /// Indices of interceptors whose pre-phase ran and whose post-phase has
    /// not, innermost last.
    pub(crate) entered: Vec<usize>,
}

impl InvocationContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        request_id: Uuid,
        method: Method,
        path: String,
        route: String,
        headers: HeaderMap,
        body: Bytes,
        params: HashMap<String, String>,
        boundary: Arc<PersistenceBoundary>,
    ) -> Self {
        Self {
            request_id,
            method,
            path,
            route,
            headers,
            body,
            params,
            attributes: Extensions::new(),
            unit: None,
            boundary,
            attempt: 0,
            state: RequestState::Received,
            entered: Vec::new(),
        }
    }

    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The matched route pattern, e.g. `/items/{id}`.
    #[must_use]
    pub fn route(&self) -> &str {
        &self.route
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Route parameter bound by the router.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Deserializes the request body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed or mismatched bodies.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Typed interceptor-scoped metadata.
    #[must_use]
    pub fn attribute<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.attributes.get::<T>()
    }

    pub fn insert_attribute<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.attributes.insert(value)
    }

    pub fn remove_attribute<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.attributes.remove::<T>()
    }

    /// Zero on the first attempt, incremented on every commit-conflict retry.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub fn state(&self) -> RequestState {
        self.state
    }

    #[must_use]
    pub fn unit(&self) -> Option<&UnitOfWork> {
        self.unit.as_ref()
    }

    /// Whether a success reported now still has to survive a commit.
    #[must_use]
    pub fn commit_pending(&self) -> bool {
        self.unit.as_ref().is_some_and(UnitOfWork::is_active)
    }

    // -- persistence ---------------------------------------------------------

    /// Executes `op` in the open unit of work.
    ///
    /// # Errors
    ///
    /// [`OperationError::NoUnitOfWork`] on a non-transactional route, or the
    /// boundary's error.
    pub async fn execute(&mut self, op: ChangeOp) -> Result<ChangeResult, OperationError> {
        let unit = self.unit.as_mut().ok_or(OperationError::NoUnitOfWork)?;
        Ok(self.boundary.execute(unit, op).await?)
    }

    /// Reads `key` as this invocation sees it.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn read(&mut self, key: &str) -> Result<Option<Versioned>, OperationError> {
        match self.execute(ChangeOp::read(key)).await? {
            ChangeResult::Value(value) => Ok(value),
            other => Err(unexpected(&other)),
        }
    }

    /// Stages a write and returns the version the key will have once
    /// committed.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn write(&mut self, key: &str, value: Value) -> Result<u64, OperationError> {
        self.write_op(ChangeOp::write(key, value)).await
    }

    /// Stages a write that commits only if `key` is still at `version`.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn write_expecting(
        &mut self,
        key: &str,
        value: Value,
        version: u64,
    ) -> Result<u64, OperationError> {
        self.write_op(ChangeOp::write_expecting(key, value, version)).await
    }

    async fn write_op(&mut self, op: ChangeOp) -> Result<u64, OperationError> {
        match self.execute(op).await? {
            ChangeResult::Written { version, .. } => Ok(version),
            other => Err(unexpected(&other)),
        }
    }

    /// Stages a delete; returns whether the key existed.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn delete(&mut self, key: &str) -> Result<bool, OperationError> {
        match self.execute(ChangeOp::delete(key)).await? {
            ChangeResult::Deleted { existed, .. } => Ok(existed),
            other => Err(unexpected(&other)),
        }
    }

    // -- dispatcher internals ------------------------------------------------

    pub(crate) fn transition(&mut self, next: RequestState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid request transition {:?} -> {next:?}",
            self.state
        );
        trace!(from = ?self.state, to = ?next, "request state");
        self.state = next;
    }

    pub(crate) async fn open_unit(&mut self) -> Result<(), OperationError> {
        if self.unit.is_some() {
            return Err(OperationError::UnitAlreadyOpen);
        }
        let unit = self.boundary.begin().await?;
        self.unit = Some(unit);
        self.transition(RequestState::TxOpen);
        Ok(())
    }

    /// Commits the open unit, if any.
    pub(crate) async fn commit_unit(&mut self) -> Result<(), PersistenceError> {
        match self.unit.as_mut() {
            Some(unit) if unit.is_active() => self.boundary.commit(unit).await,
            _ => Ok(()),
        }
    }

    /// Rolls back the open unit, if any. Never fails: a unit that cannot be
    /// rolled back is already finished.
    pub(crate) async fn rollback_unit(&mut self) {
        if let Some(unit) = self.unit.as_mut() {
            if unit.is_active() {
                // Rollback of an active unit is infallible.
                let _ = self.boundary.rollback(unit).await;
            }
        }
    }

    /// Prepares the context for rerunning the chain after a conflict.
    pub(crate) fn reset_for_retry(&mut self) {
        debug_assert!(!self.unit.as_ref().is_some_and(UnitOfWork::is_active));
        self.unit = None;
        self.attributes.clear();
        self.entered.clear();
        self.attempt += 1;
    }
}

fn unexpected(result: &ChangeResult) -> OperationError {
    OperationError::Internal(anyhow!("unexpected change result: {result:?}"))
}

impl Drop for InvocationContext {
    fn drop(&mut self) {
        if let Some(unit) = self.unit.as_mut() {
            unit.abandon();
        }
    }
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("route", &self.route)
            .field("attempt", &self.attempt)
            .field("state", &self.state)
            .field("unit", &self.unit)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::test_support::{boundary, context};
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Marker(u32);

    #[test]
    fn attributes_are_typed() {
        let boundary = boundary();
        let mut ctx = context(&boundary, "");
        assert!(ctx.attribute::<Marker>().is_none());
        ctx.insert_attribute(Marker(7));
        assert_eq!(ctx.attribute::<Marker>(), Some(&Marker(7)));
        assert_eq!(ctx.remove_attribute::<Marker>(), Some(Marker(7)));
    }

    #[test]
    fn json_body_parses() {
        let boundary = boundary();
        let ctx = context(&boundary, r#"{"a": 1}"#);
        let value: Value = ctx.json().unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[tokio::test]
    async fn persistence_requires_open_unit() {
        let boundary = boundary();
        let mut ctx = context(&boundary, "");
        let err = ctx.read("k").await.unwrap_err();
        assert!(matches!(err, OperationError::NoUnitOfWork));
    }

    #[tokio::test]
    async fn second_unit_is_refused() {
        let boundary = boundary();
        let mut ctx = context(&boundary, "");
        ctx.transition(RequestState::Routed);
        ctx.transition(RequestState::Executing);
        ctx.open_unit().await.unwrap();
        assert!(matches!(
            ctx.open_unit().await,
            Err(OperationError::UnitAlreadyOpen)
        ));
        ctx.rollback_unit().await;
    }

    #[tokio::test]
    async fn dropping_active_unit_rolls_back() {
        let boundary = boundary();
        {
            let mut ctx = context(&boundary, "");
            ctx.transition(RequestState::Routed);
            ctx.transition(RequestState::Executing);
            ctx.open_unit().await.unwrap();
            ctx.write("k", json!(1)).await.unwrap();
        }
        let stats = boundary.stats();
        assert_eq!(stats.abandoned, 1);
        assert_eq!(stats.rolled_back, 1);
        assert_eq!(stats.committed, 0);
    }

    #[tokio::test]
    async fn helpers_round_trip_through_unit() {
        let boundary = boundary();
        let mut ctx = context(&boundary, "");
        ctx.transition(RequestState::Routed);
        ctx.transition(RequestState::Executing);
        ctx.open_unit().await.unwrap();

        assert_eq!(ctx.write("k", json!("v")).await.unwrap(), 1);
        assert_eq!(ctx.read("k").await.unwrap().unwrap().value, json!("v"));
        assert!(ctx.delete("k").await.unwrap());
        ctx.commit_unit().await.unwrap();
        assert_eq!(boundary.stats().committed, 1);
    }
}
