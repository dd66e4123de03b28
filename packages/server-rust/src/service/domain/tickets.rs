//! Cinema halls and ticket reservation.
//!
//! A hall is stored as a single versioned record under `hall/<id>` holding
//! its dimensions and reserved seats. Reserving a ticket reads the hall,
//! picks the next available seat and writes the hall back against the
//! version it read, so two concurrent reservations never hand out the same
//! seat: the loser conflicts and the dispatcher reruns it on fresh state.

use anyhow::Context as _;
use async_trait::async_trait;
use seatline_core::{
    CinemaHall, HallError, HallRecord, HallSummary, NewHall, Point, SeatRequest, SeatStatus,
    SeatView,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::service::context::InvocationContext;
use crate::service::interceptors::{JsonBodyInterceptor, NonEmptyBodyInterceptor};
use crate::service::operation::{Handler, OperationError, Outcome};
use crate::service::router::RouteSpec;
use crate::storage::{ChangeOp, ChangeResult, PersistenceBoundary, Versioned};

fn hall_key(id: &str) -> String {
    format!("hall/{id}")
}

fn summary(id: &str, hall: &CinemaHall) -> HallSummary {
    HallSummary {
        id: id.to_string(),
        rows: hall.rows(),
        cols: hall.cols(),
        capacity: hall.capacity(),
        reserved: hall.reserved_count(),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, OperationError> {
    Ok(serde_json::to_value(value).context("serializing response")?)
}

fn decode_hall(id: &str, record: Versioned) -> Result<(CinemaHall, u64), OperationError> {
    let stored: HallRecord = serde_json::from_value(record.value)
        .with_context(|| format!("decoding hall {id}"))?;
    let hall = CinemaHall::from_record(&stored).with_context(|| format!("loading hall {id}"))?;
    Ok((hall, record.version))
}

/// Loads a hall and the version it was read at.
async fn load_hall(
    ctx: &mut InvocationContext,
    id: &str,
) -> Result<Option<(CinemaHall, u64)>, OperationError> {
    ctx.read(&hall_key(id))
        .await?
        .map(|record| decode_hall(id, record))
        .transpose()
}

async fn store_hall(
    ctx: &mut InvocationContext,
    id: &str,
    hall: &CinemaHall,
    read_version: u64,
) -> Result<u64, OperationError> {
    let value = to_json(&hall.to_record())?;
    ctx.write_expecting(&hall_key(id), value, read_version).await
}

fn valid_hall_id(id: &str) -> bool {
    !id.is_empty() && !id.contains('/')
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

struct CreateHall;

#[async_trait]
impl Handler for CreateHall {
    async fn call(&self, ctx: &mut InvocationContext) -> Result<Outcome, OperationError> {
        let request: NewHall = match ctx.json() {
            Ok(request) => request,
            Err(err) => return Ok(Outcome::invalid(format!("invalid hall: {err}"))),
        };
        if !valid_hall_id(&request.id) {
            return Ok(Outcome::invalid("hall id must be a non-empty path segment"));
        }
        let hall = match CinemaHall::new(request.rows, request.cols) {
            Ok(hall) => hall,
            Err(err) => return Ok(Outcome::invalid(err.to_string())),
        };
        if ctx.read(&hall_key(&request.id)).await?.is_some() {
            return Ok(Outcome::rejected(format!("hall {} already exists", request.id)));
        }

        store_hall(ctx, &request.id, &hall, 0).await?;
        Ok(Outcome::created(to_json(&summary(&request.id, &hall))?))
    }
}

struct GetHall;

#[async_trait]
impl Handler for GetHall {
    async fn call(&self, ctx: &mut InvocationContext) -> Result<Outcome, OperationError> {
        let id = ctx.param("id").unwrap_or_default().to_string();
        Ok(match load_hall(ctx, &id).await? {
            Some((hall, _)) => Outcome::ok(to_json(&summary(&id, &hall))?),
            None => Outcome::not_found(format!("hall {id} not found")),
        })
    }
}

/// Reserves the next available seat in a hall: the one named by the `id`
/// route parameter, or `default_hall`.
struct ReserveTicket {
    default_hall: Option<String>,
}

#[async_trait]
impl Handler for ReserveTicket {
    async fn call(&self, ctx: &mut InvocationContext) -> Result<Outcome, OperationError> {
        let id = match (ctx.param("id"), &self.default_hall) {
            (Some(id), _) => id.to_string(),
            (None, Some(default)) => default.clone(),
            (None, None) => return Ok(Outcome::invalid("no hall given")),
        };

        let preferred = if ctx.body().iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            match ctx.json::<SeatRequest>() {
                Ok(seat) => Some(Point::from(seat)),
                Err(err) => return Ok(Outcome::invalid(format!("invalid seat request: {err}"))),
            }
        };

        let Some((mut hall, version)) = load_hall(ctx, &id).await? else {
            return Ok(Outcome::not_found(format!("hall {id} not found")));
        };

        let seat = match preferred {
            Some(preferred) => match hall.next_available_from(preferred) {
                Ok(seat) => seat,
                Err(err @ HallError::OutOfBounds { .. }) => {
                    return Ok(Outcome::invalid(err.to_string()));
                }
                Err(err) => return Err(OperationError::Internal(err.into())),
            },
            None => hall.next_available(),
        };
        let Some(seat) = seat else {
            debug!(hall = %id, "sold out");
            return Ok(Outcome::rejected("hall is sold out"));
        };

        store_hall(ctx, &id, &hall, version).await?;
        let view = SeatView {
            row: seat.row,
            column: seat.column,
            distance_to_center: seat.distance_to(hall.center()),
        };
        Ok(Outcome::created(to_json(&view)?))
    }
}

struct GetSeat;

#[async_trait]
impl Handler for GetSeat {
    async fn call(&self, ctx: &mut InvocationContext) -> Result<Outcome, OperationError> {
        let id = ctx.param("id").unwrap_or_default().to_string();
        let coordinates = (
            ctx.param("row").and_then(|v| v.parse::<u32>().ok()),
            ctx.param("column").and_then(|v| v.parse::<u32>().ok()),
        );
        let (Some(row), Some(column)) = coordinates else {
            return Ok(Outcome::invalid("row and column must be non-negative integers"));
        };

        let Some((hall, _)) = load_hall(ctx, &id).await? else {
            return Ok(Outcome::not_found(format!("hall {id} not found")));
        };
        let seat = Point::new(row, column);
        if !hall.contains(seat) {
            return Ok(Outcome::not_found(format!("seat {seat} not found in hall {id}")));
        }
        Ok(Outcome::ok(to_json(&SeatStatus {
            row,
            column,
            reserved: hall.is_reserved(seat),
            available: hall.is_available(seat),
        })?))
    }
}

// ---------------------------------------------------------------------------
// Routes and seeding
// ---------------------------------------------------------------------------

/// Hall and ticket routes. `POST /ticket` reserves in `default_hall`.
#[must_use]
pub fn routes(default_hall: &str) -> Vec<RouteSpec> {
    vec![
        RouteSpec::post("/halls", CreateHall)
            .intercept(NonEmptyBodyInterceptor)
            .intercept(JsonBodyInterceptor)
            .transactional(),
        RouteSpec::get("/halls/{id}", GetHall).transactional(),
        RouteSpec::post("/halls/{id}/tickets", ReserveTicket { default_hall: None })
            .intercept(JsonBodyInterceptor)
            .transactional(),
        RouteSpec::post(
            "/ticket",
            ReserveTicket {
                default_hall: Some(default_hall.to_string()),
            },
        )
        .intercept(JsonBodyInterceptor)
        .transactional(),
        RouteSpec::get("/halls/{id}/seats/{row}/{column}", GetSeat).transactional(),
    ]
}

/// Creates hall `id` unless it already exists. Returns whether it was created.
///
/// # Errors
///
/// Fails on invalid dimensions or storage errors.
pub async fn seed_hall(
    boundary: &PersistenceBoundary,
    id: &str,
    rows: u32,
    cols: u32,
) -> anyhow::Result<bool> {
    let hall = CinemaHall::new(rows, cols)?;
    let key = hall_key(id);
    let mut unit = boundary.begin().await?;

    if let ChangeResult::Value(Some(_)) = boundary.execute(&mut unit, ChangeOp::read(&key)).await? {
        boundary.rollback(&mut unit).await?;
        debug!(hall = id, "hall already present, not seeding");
        return Ok(false);
    }

    let value = serde_json::to_value(hall.to_record())?;
    boundary
        .execute(&mut unit, ChangeOp::write_expecting(&key, value, 0))
        .await?;
    if let Err(err) = boundary.commit(&mut unit).await {
        boundary.rollback(&mut unit).await?;
        return Err(err.into());
    }
    info!(hall = id, rows, cols, "seeded hall");
    Ok(true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
