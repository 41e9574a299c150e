//! Client Facade (spec §4.4, §6.1): the public entry point. Holds a backend
//! handle, a client-id, and the GC hysteresis threshold, and forwards each
//! call to the Channel Protocol. No local caching: `subscriptions` queries
//! `indexes(self)` live every time, since another peer can mutate
//! `clients(ch)` at any moment and a cache would go stale immediately.

use std::collections::HashMap;

use uuid::Uuid;

use crate::backend::{Backend, RedisBackend};
use crate::config::{Config, ConnectOptions};
use crate::envelope::Envelope;
use crate::error::Result;
use crate::policy::IndexPolicy;
use crate::{config, protocol};

/// A Rivulet client bound to one backend connection. Generic over the
/// backend so tests can substitute `backend::InMemoryBackend`; production
/// code gets `RedisBackend` by default.
pub struct Client<B: Backend = RedisBackend> {
    backend: B,
    client_id: String,
    bufsize: u64,
}

impl Client<RedisBackend> {
    /// Opens a connection and, if `channels` is non-empty, immediately
    /// subscribes to them with `IndexPolicy::Current` (spec §6.1).
    pub fn connect(
        redis_url: &str,
        client_id: Option<String>,
        channels: &[String],
        options: ConnectOptions,
    ) -> Result<Self> {
        let config = Config::new(redis_url, options)?;
        let backend = RedisBackend::connect(&config.redis_url)?;
        Client::with_backend(backend, client_id, channels, config.bufsize)
    }
}

impl<B: Backend> Client<B> {
    /// Builds a client around an already-constructed backend. The entry
    /// point for tests running against `InMemoryBackend`; production callers
    /// should use [`Client::connect`].
    pub fn with_backend(
        mut backend: B,
        client_id: Option<String>,
        channels: &[String],
        bufsize: u64,
    ) -> Result<Self> {
        let client_id = client_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if !channels.is_empty() {
            protocol::subscribe(
                &mut backend,
                &client_id,
                channels,
                IndexPolicy::Current,
                config::DEFAULT_SUBSCRIBE_LOCK_TIMEOUT_MS,
            )?;
        }
        Ok(Client {
            backend,
            client_id,
            bufsize,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Round-trip check that the backend is reachable (spec §6.1).
    pub fn ping(&mut self) -> Result<bool> {
        self.backend.ping()?;
        Ok(true)
    }

    /// Live query of `indexes(self)` membership. Never cached.
    pub fn subscriptions(&mut self) -> Result<Vec<String>> {
        protocol::subscriptions(&mut self.backend, &self.client_id)
    }

    pub fn subscribe(
        &mut self,
        channels: &[String],
        policy: IndexPolicy,
        lock_timeout_ms: u64,
    ) -> Result<()> {
        protocol::subscribe(&mut self.backend, &self.client_id, channels, policy, lock_timeout_ms)
    }

    /// `subscribe` with the spec's defaults: `policy=CURRENT`,
    /// `lock_timeout_ms=1000`.
    pub fn subscribe_default(&mut self, channels: &[String]) -> Result<()> {
        self.subscribe(
            channels,
            IndexPolicy::Current,
            config::DEFAULT_SUBSCRIBE_LOCK_TIMEOUT_MS,
        )
    }

    /// Idempotent (spec §4.3).
    pub fn unsubscribe(&mut self, channels: &[String]) -> Result<()> {
        protocol::unsubscribe(&mut self.backend, &self.client_id, channels)
    }

    pub fn write(&mut self, channel: &str, data: &str, lock_timeout_ms: u64) -> Result<Envelope> {
        protocol::write(&mut self.backend, &self.client_id, channel, data, lock_timeout_ms)
    }

    /// `write` with the spec's default `lock_timeout_ms=10000`.
    pub fn write_default(&mut self, channel: &str, data: &str) -> Result<Envelope> {
        self.write(channel, data, config::DEFAULT_WRITE_LOCK_TIMEOUT_MS)
    }

    /// One non-blocking sweep across all of this client's subscriptions.
    /// Channels with no new messages are omitted from the returned map.
    pub fn read(&mut self, message_limit: u64) -> Result<HashMap<String, Vec<Envelope>>> {
        protocol::read(&mut self.backend, &self.client_id, message_limit, self.bufsize)
    }

    /// `read` with the spec's default `message_limit=512`.
    pub fn read_default(&mut self) -> Result<HashMap<String, Vec<Envelope>>> {
        self.read(config::DEFAULT_READ_MESSAGE_LIMIT)
    }

    /// Explicit, deterministic reclamation (SPEC_FULL.md §4.3 addition).
    pub fn compact(&mut self, channel: &str) -> Result<()> {
        protocol::compact(&mut self.backend, channel)
    }
}
