//! Ratewise Engine - Admission, Aggregation and Queries
//!
//! Turns a [`VoteStore`](ratewise_storage::VoteStore) and a
//! [`RateableRegistry`](ratewise_core::RateableRegistry) into a rating
//! engine:
//!
//! - [`AdmissionController`] validates and records votes, one per
//!   (rateable, rater, dimension), and refreshes the aggregate in the same
//!   critical section.
//! - [`AggregationEngine`] computes zero-guarded averages and keeps the
//!   per-dimension cache fields current.
//! - [`QueryIndex`] answers read-side questions without writing.
//! - [`RatingService`] wires the three together from an [`EngineConfig`](ratewise_core::EngineConfig).
//!
//! Lock order is always vote key first, then aggregate pair.

mod admission;
mod aggregation;
mod query;
mod service;

pub use admission::AdmissionController;
pub use aggregation::AggregationEngine;
pub use query::QueryIndex;
pub use service::RatingService;
