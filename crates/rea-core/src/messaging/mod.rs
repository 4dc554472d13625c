//! Outbound messaging: the messenger port, its rate limiter and the
//! `Delivery` adapter the engine talks to.

pub mod delivery;
pub mod port;
pub mod throttled;
