//! AMQP-backed queue backend: wires a pool's queue producers to a real
//! broker connection over `amqprs`.

mod client;

pub use client::{AmqpBackend, AmqpConfig};
