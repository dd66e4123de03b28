//! Business routes layered on the dispatch core.
//!
//! - [`items`]: generic versioned items
//! - [`tickets`]: cinema halls and seat reservation

pub mod items;
pub mod tickets;

use crate::config::SeatlineConfig;
use crate::service::router::{RouteError, RouteTable, RouteTableBuilder};

/// Builds the full route table, wrapping every route in the configured
/// global interceptors.
///
/// # Errors
///
/// Returns the first invalid or ambiguous registration.
pub fn build_route_table(config: &SeatlineConfig) -> Result<RouteTable, RouteError> {
    let mut builder = RouteTableBuilder::new(config.dispatch.build_global_interceptors());
    builder
        .register_all(items::routes())?
        .register_all(tickets::routes(&config.hall.default_hall_id))?;
    Ok(builder.build())
}
