//! Centralised derivation of backend key names from channel-id and
//! client-id. All components go through this module so that peers running
//! different library versions still agree on the on-wire layout (spec
//! §4.1, §6.3).

/// `messages:channel#<channel_id>`: ordered set of JSON envelopes.
pub fn messages(channel_id: &str) -> String {
    format!("messages:channel#{channel_id}")
}

/// `ids:channel#<channel_id>`: 64-bit monotonically increasing counter.
pub fn ids(channel_id: &str) -> String {
    format!("ids:channel#{channel_id}")
}

/// `clients:channel#<channel_id>`: ordered set of client-ids to cursors.
pub fn clients(channel_id: &str) -> String {
    format!("clients:channel#{channel_id}")
}

/// `indexes:client#<client_id>`: ordered set of channel-ids to cursors.
pub fn indexes(client_id: &str) -> String {
    format!("indexes:client#{client_id}")
}

/// `lock:ids:channel#<channel_id>`: named advisory lock.
pub fn lock_ids(channel_id: &str) -> String {
    format!("lock:ids:channel#{channel_id}")
}
