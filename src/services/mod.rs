//! Business logic services
//!
//! This module contains business logic separated from HTTP concerns.
//! The reconnect monitor is the only stateful part, the other services are
//! stateless operations over the device client.

pub mod firmware;
pub mod reconnect;
pub mod wifi;
