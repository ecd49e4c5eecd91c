//! notification-orchestrator
//!
//! Consumes domain events (user created, session started, password reset
//! requested, password updated) from RabbitMQ, normalizes each one into a
//! notification event, and republishes it to the delivery queue on the
//! shared topic exchange.

pub mod broker;
pub mod config;
pub mod events;
pub mod http;
pub mod transform;
pub mod worker;
