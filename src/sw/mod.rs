//! Offline asset cache controller and the registration hosting it.
//!
//! A controller owns one cache version. Its install hook pre-populates the app
//! shell, its activate hook prunes partitions of other versions, and its fetch
//! hook routes each GET to bypass, network-first or cache-first handling.

mod controller;
mod registration;

pub use controller::Controller;
pub use registration::Registration;
