//! Transports for the Courier delivery engine.
//!
//! - `http`: delivery and liveness probing against a REST backend
//! - `loopback`: in-process sender for demos and local testing

pub mod http;
pub mod loopback;

pub use http::{HttpProbe, HttpSender};
pub use loopback::LoopbackSender;
