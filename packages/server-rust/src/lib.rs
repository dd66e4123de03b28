//! Seatline server: interception-aware reactive dispatch over a transactional store.
//!
//! Requests enter through the axum surface in [`network`], are resolved and
//! run through interceptor chains in [`service`], and persist through the
//! unit-of-work boundary in [`storage`].

pub mod config;
pub mod network;
pub mod service;
pub mod storage;

pub use config::{Cli, HallConfig, LogFormat, SeatlineConfig};
pub use network::NetworkModule;
pub use service::{Dispatcher, DispatchRequest, DispatchResponse};
pub use storage::PersistenceBoundary;
