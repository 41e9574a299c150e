//! Rivulet: a library-embedded multi-producer / multi-consumer message
//! broker over a Redis-compatible ordered-set key-value store. Every
//! process linking this crate is a peer; there is no broker process to run.
//!
//! The public surface is small by design: [`connect`] opens a [`Client`],
//! which exposes `subscribe`, `unsubscribe`, `write`, `read`, `compact`, and
//! a live `subscriptions` accessor. Everything else, the key schema, the
//! envelope codec, the advisory-lock discipline, the GC rules, is an
//! internal implementation detail of the Channel Protocol.

pub mod backend;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod key_schema;
pub mod policy;
pub mod protocol;

pub use backend::RedisBackend;
pub use client::Client;
pub use config::ConnectOptions;
pub use envelope::Envelope;
pub use error::{Error, Result};
pub use policy::IndexPolicy;

/// Constructs a client against `redis_url` (spec §6.1, §6.4). If `channels`
/// is non-empty, immediately subscribes to them with `IndexPolicy::Current`.
/// `client_id` defaults to a freshly generated UUID when `None`.
pub fn connect(
    redis_url: &str,
    client_id: Option<String>,
    channels: &[String],
    options: ConnectOptions,
) -> Result<Client> {
    Client::connect(redis_url, client_id, channels, options)
}
