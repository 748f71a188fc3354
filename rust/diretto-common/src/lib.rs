#![warn(missing_docs)]

//! Process-local coordination primitives shared by every diretto node.
//!
//! Nothing in here talks to a backend. The [JoinBarrier] turns a fan-out of
//! independent async sub-operations into exactly one outcome, and the
//! [LeaseCache] keeps values around for a fixed lease so that hot lookups
//! (credentials, mostly) skip a backend round trip.

mod barrier;
pub use barrier::*;

mod cache;
pub use cache::*;
