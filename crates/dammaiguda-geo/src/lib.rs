//! Family location tracking and geofence evaluation.
//!
//! Watchers place circular fences around family members they hold an
//! accepted link with. Members report location samples; each sample is
//! compared against every fence around that member, and crossing a boundary
//! publishes a `geofence.transition` event whose sole recipient is the
//! fence's owner.
//!
//! The first sample for a member produces no transition: there is no
//! previous state to cross from.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod evaluator;

pub use error::{GeoError, Result};
pub use evaluator::{haversine_m, CreateFence, FenceCrossing, GeofenceEvaluator, LocationSample};
