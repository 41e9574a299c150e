//! The Channel Protocol: subscribe / write / read / unsubscribe state
//! transitions against backend state (spec §4.3). This is the core of the
//! crate, the only layer that reasons about invariants. Everything else
//! (key schema, envelope codec, backend adapter) is mechanical.

use std::collections::HashMap;

use log::{debug, trace, warn};

use crate::backend::{with_lock, Backend, PipelineOp, PipelineValue};
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::key_schema;
use crate::policy::IndexPolicy;

/// Cooperative GC threshold (spec §4.3, §9 Open Question 1): true when the
/// slowest subscriber's snapshot score is more than `bufsize` ahead of this
/// reader's pre-advance cursor. Because the reader's own prior score is
/// always part of the population `min_other` is drawn from, this is
/// essentially never satisfied during single-session use. It only fires in
/// the face of a concurrent update to `clients(ch)` between the snapshot and
/// this read's own prior subscription state. Preserved verbatim for wire
/// compatibility rather than simplified away.
fn gc_threshold_exceeded(min_other: u64, bufsize: u64, cursor: u64) -> bool {
    min_other.checked_sub(bufsize).map(|margin| margin > cursor).unwrap_or(false)
}

/// Per-channel protocol for `subscribe` (spec §4.3). Resolves the starting
/// cursor under `lock:ids(ch)` and writes the mirrored cursor pair.
fn subscribe_one<B: Backend>(
    backend: &mut B,
    client_id: &str,
    channel: &str,
    policy: IndexPolicy,
    lock_timeout_ms: u64,
) -> Result<()> {
    let lock_name = key_schema::lock_ids(channel);
    with_lock(backend, &lock_name, lock_timeout_ms, |backend| {
        let clients_key = key_schema::clients(channel);
        let members = backend.zrange_with_scores(&clients_key)?;
        let already_subscribed = members.iter().any(|m| m.member == client_id);

        let cursor = match policy {
            IndexPolicy::Earliest => members.iter().map(|m| m.score).min().unwrap_or(0),
            IndexPolicy::Latest => members.iter().map(|m| m.score).max().unwrap_or(0),
            IndexPolicy::Current => {
                if already_subscribed {
                    debug!("client {client_id} already subscribed to {channel}, CURRENT is a no-op");
                    return Ok(());
                }
                members.iter().map(|m| m.score).max().unwrap_or(0)
            }
        };

        let indexes_key = key_schema::indexes(client_id);
        backend.exec_pipeline(&[
            PipelineOp::ZAdd {
                key: clients_key,
                member: client_id.to_string(),
                score: cursor,
            },
            PipelineOp::ZAdd {
                key: indexes_key,
                member: channel.to_string(),
                score: cursor,
            },
        ])?;
        debug!("client {client_id} subscribed to {channel} at cursor {cursor}");
        Ok(())
    })
}

/// Subscribes to each channel in turn. Not transactional across channels:
/// a failure on the Nth channel leaves the first N-1 fully subscribed
/// (spec §7).
pub fn subscribe<B: Backend>(
    backend: &mut B,
    client_id: &str,
    channels: &[String],
    policy: IndexPolicy,
    lock_timeout_ms: u64,
) -> Result<()> {
    for channel in channels {
        subscribe_one(backend, client_id, channel, policy, lock_timeout_ms)?;
    }
    Ok(())
}

/// `write` (spec §4.3): allocate an id under the lock, build the envelope,
/// and append it to `messages(ch)`. No prior subscription is required.
pub fn write<B: Backend>(
    backend: &mut B,
    client_id: &str,
    channel: &str,
    data: &str,
    lock_timeout_ms: u64,
) -> Result<Envelope> {
    let lock_name = key_schema::lock_ids(channel);
    with_lock(backend, &lock_name, lock_timeout_ms, |backend| {
        let id = backend.incr(&key_schema::ids(channel))?;
        let envelope = Envelope::new(id, client_id, data);
        let encoded = envelope.encode()?;
        backend.exec_pipeline(&[PipelineOp::ZAdd {
            key: key_schema::messages(channel),
            member: encoded,
            score: id,
        }])?;
        trace!("wrote id {id} to {channel}");
        Ok(envelope)
    })
}

/// `read` (spec §4.3): one non-blocking sweep across all of the caller's
/// subscriptions. No locks are acquired. Channels with no new messages are
/// omitted from the returned map.
pub fn read<B: Backend>(
    backend: &mut B,
    client_id: &str,
    message_limit: u64,
    bufsize: u64,
) -> Result<HashMap<String, Vec<Envelope>>> {
    let indexes_key = key_schema::indexes(client_id);
    let subscriptions = backend.zrange_with_scores(&indexes_key)?;
    if subscriptions.is_empty() {
        return Ok(HashMap::new());
    }

    let mut result = HashMap::new();
    let mut deferred_ops: Vec<PipelineOp> = Vec::new();

    for subscription in &subscriptions {
        let channel = &subscription.member;
        let cursor = subscription.score;
        let messages_key = key_schema::messages(channel);

        let raw_messages =
            backend.zrange_by_score(&messages_key, cursor, cursor.saturating_add(message_limit))?;
        if raw_messages.is_empty() {
            // Either genuinely no new messages, or another actor unsubscribed
            // this channel between steps 1 and 2. Either way: drop silently.
            continue;
        }

        let clients_key = key_schema::clients(channel);
        let clients_snapshot = backend.zrange_with_scores(&clients_key)?;

        let mut envelopes = Vec::with_capacity(raw_messages.len());
        for raw in &raw_messages {
            envelopes.push(Envelope::decode(raw)?);
        }
        // zrange_by_score already returns score order; this is a defensive
        // re-sort so a cursor never regresses even if a backend returns
        // ties out of order.
        envelopes.sort_by_key(|e| e.id);

        let newest = envelopes
            .last()
            .expect("checked non-empty above")
            .id;

        deferred_ops.push(PipelineOp::ZAdd {
            key: indexes_key.clone(),
            member: channel.clone(),
            score: newest,
        });
        deferred_ops.push(PipelineOp::ZAdd {
            key: clients_key.clone(),
            member: client_id.to_string(),
            score: newest,
        });

        // Cooperative GC rule (spec §4.3): recomputed from the *snapshot*
        // taken above, not refreshed after the cursor advance just queued.
        let min_other = clients_snapshot.iter().map(|m| m.score).min().unwrap_or(0);
        if gc_threshold_exceeded(min_other, bufsize, cursor) {
            trace!(
                "read path GC on {channel}: slowest subscriber at {min_other}, trimming up to it"
            );
            deferred_ops.push(PipelineOp::ZRemRangeByScore {
                key: messages_key,
                min: 0,
                max: min_other,
            });
        }

        result.insert(channel.clone(), envelopes);
    }

    if !deferred_ops.is_empty() {
        backend.exec_pipeline(&deferred_ops)?;
    }

    Ok(result)
}

/// `unsubscribe` (spec §4.3): idempotent. Performs the strong GC pass when
/// subscribers remain, or deletes the channel entirely when the caller was
/// the last one.
pub fn unsubscribe<B: Backend>(backend: &mut B, client_id: &str, channels: &[String]) -> Result<()> {
    for channel in channels {
        let clients_key = key_schema::clients(channel);
        let indexes_key = key_schema::indexes(client_id);

        let replies = backend.exec_pipeline(&[
            PipelineOp::ZRem {
                key: clients_key.clone(),
                member: client_id.to_string(),
            },
            PipelineOp::ZRem {
                key: indexes_key,
                member: channel.clone(),
            },
            PipelineOp::ZCard {
                key: clients_key.clone(),
            },
        ])?;
        let remaining = match replies.last() {
            Some(PipelineValue::Int(count)) => (*count).max(0) as u64,
            _ => return Err(Error::backend("pipeline did not return a zcard result")),
        };
        if remaining > 0 {
            let scores = backend.zrange_with_scores(&clients_key)?;
            let min = scores.iter().map(|m| m.score).min().unwrap_or(0);
            backend.exec_pipeline(&[PipelineOp::ZRemRangeByScore {
                key: key_schema::messages(channel),
                min: 0,
                max: min,
            }])?;
            debug!("unsubscribe {client_id} from {channel}: {remaining} subscribers remain, trimmed to {min}");
        } else {
            backend.exec_pipeline(&[
                PipelineOp::Del {
                    key: key_schema::messages(channel),
                },
                PipelineOp::Del {
                    key: key_schema::ids(channel),
                },
            ])?;
            debug!("unsubscribe {client_id} from {channel}: last subscriber left, channel collected");
        }
    }
    Ok(())
}

/// Explicit, deterministic reclamation (SPEC_FULL.md §4.3 addition). Unlike
/// `read`'s advisory GC, this always trims up to the slowest subscriber's
/// cursor, regardless of hysteresis. Acquires no lock: message deletion
/// never races against id allocation (spec §5).
pub fn compact<B: Backend>(backend: &mut B, channel: &str) -> Result<()> {
    let clients_key = key_schema::clients(channel);
    let scores = backend.zrange_with_scores(&clients_key)?;
    let min = scores.iter().map(|m| m.score).min().unwrap_or(0);
    if min == 0 {
        return Ok(());
    }
    backend.exec_pipeline(&[PipelineOp::ZRemRangeByScore {
        key: key_schema::messages(channel),
        min: 0,
        max: min,
    }])?;
    Ok(())
}

/// Live query of `indexes(self)` membership (spec §4.4). Never cached.
pub fn subscriptions<B: Backend>(backend: &mut B, client_id: &str) -> Result<Vec<String>> {
    let members = backend.zrange_with_scores(&key_schema::indexes(client_id))?;
    Ok(members.into_iter().map(|m| m.member).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;

    fn write_n(backend: &mut InMemoryBackend, client: &str, channel: &str, n: u64, prefix: &str) {
        for i in 0..n {
            write(backend, client, channel, &format!("{prefix}-{i}"), 10_000).unwrap();
        }
    }

    // E1: subscribe, write 5, read, exact ids and payloads in order.
    #[test]
    fn e1_write_then_read_preserves_order_and_ids() {
        let mut backend = InMemoryBackend::new();
        subscribe(&mut backend, "a", &["ch-alpha".into()], IndexPolicy::Current, 1_000).unwrap();
        write_n(&mut backend, "a", "ch-alpha", 5, "hello");

        let msgs = read(&mut backend, "a", 512, 4096).unwrap();
        let got = &msgs["ch-alpha"];
        assert_eq!(got.len(), 5);
        for (i, env) in got.iter().enumerate() {
            assert_eq!(env.id, (i + 1) as u64);
            assert_eq!(env.data, format!("hello-{i}"));
        }
    }

    // E2: writes before any subscriber exist; EARLIEST replay sees them all.
    #[test]
    fn e2_earliest_replays_history_written_before_subscribing() {
        let mut backend = InMemoryBackend::new();
        write_n(&mut backend, "publisher", "ch-beta", 10, "m");

        subscribe(&mut backend, "b", &["ch-beta".into()], IndexPolicy::Earliest, 1_000).unwrap();
        let msgs = read(&mut backend, "b", 512, 4096).unwrap();
        assert_eq!(msgs["ch-beta"].len(), 10);
    }

    // E3: LATEST skips history; only strictly-after messages are seen.
    #[test]
    fn e3_latest_skips_history_but_sees_future_writes() {
        let mut backend = InMemoryBackend::new();
        subscribe(&mut backend, "a", &["ch-gamma".into()], IndexPolicy::Current, 1_000).unwrap();
        write_n(&mut backend, "a", "ch-gamma", 10, "old");
        read(&mut backend, "a", 512, 4096).unwrap();

        subscribe(&mut backend, "b", &["ch-gamma".into()], IndexPolicy::Latest, 1_000).unwrap();
        // An immediate read sees nothing.
        let msgs = read(&mut backend, "b", 512, 4096).unwrap();
        assert!(!msgs.contains_key("ch-gamma"));

        write_n(&mut backend, "a", "ch-gamma", 10, "new");
        let msgs_a = read(&mut backend, "a", 512, 4096).unwrap();
        let msgs_b = read(&mut backend, "b", 512, 4096).unwrap();
        assert_eq!(msgs_a["ch-gamma"].len(), 10);
        assert_eq!(msgs_b["ch-gamma"].len(), 10);
    }

    // E4: message_limit bounds each sweep; a second read drains the rest.
    #[test]
    fn e4_message_limit_bounds_each_read() {
        let mut backend = InMemoryBackend::new();
        subscribe(&mut backend, "a", &["ch-delta".into()], IndexPolicy::Current, 1_000).unwrap();
        write_n(&mut backend, "a", "ch-delta", 10, "m");

        let first = read(&mut backend, "a", 5, 4096).unwrap();
        assert_eq!(first["ch-delta"].len(), 5);
        assert_eq!(first["ch-delta"][0].id, 1);
        assert_eq!(first["ch-delta"][4].id, 5);

        let second = read(&mut backend, "a", 5, 4096).unwrap();
        assert_eq!(second["ch-delta"].len(), 5);
        assert_eq!(second["ch-delta"][0].id, 6);
        assert_eq!(second["ch-delta"][4].id, 10);
    }

    // E5: a slow subscriber suppresses GC until it pulls within bufsize.
    #[test]
    fn e5_gc_is_gated_by_bufsize_hysteresis() {
        let mut backend = InMemoryBackend::new();
        subscribe(&mut backend, "a", &["ch-eps".into()], IndexPolicy::Current, 1_000).unwrap();
        subscribe(&mut backend, "b", &["ch-eps".into()], IndexPolicy::Current, 1_000).unwrap();
        write_n(&mut backend, "a", "ch-eps", 100, "m");

        // A reads everything; B never reads (stays at cursor 0).
        read(&mut backend, "a", 100, 4096).unwrap();

        // A reads again with a tiny bufsize: min_other (B's cursor, 0) minus
        // bufsize underflows, so no GC fires.
        let before = backend.zcard(&key_schema::messages("ch-eps")).unwrap();
        write(&mut backend, "a", "ch-eps", "one-more", 1_000).unwrap();
        read(&mut backend, "a", 100, 4).unwrap();
        let after = backend.zcard(&key_schema::messages("ch-eps")).unwrap();
        assert_eq!(before + 1, after, "no message should have been collected yet");

        // Once B catches up, a's own prior cursor is still >= min_other (B is
        // no longer behind), so the hysteresis condition stays unsatisfied.
        // The advisory rule never collects on a's own read. Only `compact`
        // (or `unsubscribe`'s strong pass) deterministically reclaims here.
        read(&mut backend, "b", 100, 4096).unwrap();
        write(&mut backend, "a", "ch-eps", "trigger-gc", 1_000).unwrap();
        read(&mut backend, "a", 100, 4).unwrap();
        let final_count = backend.zcard(&key_schema::messages("ch-eps")).unwrap();
        assert_eq!(after + 1, final_count, "cooperative GC still does not fire from a's own read");

        compact(&mut backend, "ch-eps").unwrap();
        assert!(
            backend.zcard(&key_schema::messages("ch-eps")).unwrap() < final_count,
            "compact reclaims the backlog deterministically"
        );
    }

    // The hysteresis rule itself, tested as pure arithmetic independent of
    // whether a given (min_other, cursor) pair is reachable through the
    // protocol's own sequential operations (spec §9 Open Question 1).
    #[test]
    fn gc_threshold_exceeded_is_a_strict_margin_check() {
        assert!(!gc_threshold_exceeded(0, 4096, 0), "underflow must not panic or collect");
        assert!(!gc_threshold_exceeded(100, 4, 100), "margin equal to cursor does not trigger");
        assert!(gc_threshold_exceeded(200, 4, 100), "margin strictly above cursor triggers");
    }

    // E6: two concurrent writers on the same channel get strictly
    // increasing, contiguous ids.
    #[test]
    fn e6_concurrent_writers_get_contiguous_ids() {
        let mut backend = InMemoryBackend::new();
        let env_a = write(&mut backend, "a", "ch-zeta", "from-a", 10_000).unwrap();
        let env_b = write(&mut backend, "b", "ch-zeta", "from-b", 10_000).unwrap();
        assert_eq!(env_b.id, env_a.id + 1);

        let members = backend
            .zrange_with_scores(&key_schema::messages("ch-zeta"))
            .unwrap();
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn cursor_mirror_invariant_holds_after_read() {
        let mut backend = InMemoryBackend::new();
        subscribe(&mut backend, "a", &["ch".into()], IndexPolicy::Current, 1_000).unwrap();
        write_n(&mut backend, "a", "ch", 3, "m");
        read(&mut backend, "a", 10, 4096).unwrap();

        let client_cursor = backend
            .zrange_with_scores(&key_schema::indexes("a"))
            .unwrap()
            .into_iter()
            .find(|m| m.member == "ch")
            .unwrap()
            .score;
        let channel_cursor = backend
            .zrange_with_scores(&key_schema::clients("ch"))
            .unwrap()
            .into_iter()
            .find(|m| m.member == "a")
            .unwrap()
            .score;
        assert_eq!(client_cursor, channel_cursor);
        assert_eq!(client_cursor, 3);
    }

    #[test]
    fn idempotent_unsubscribe() {
        let mut backend = InMemoryBackend::new();
        subscribe(&mut backend, "a", &["ch".into()], IndexPolicy::Current, 1_000).unwrap();
        unsubscribe(&mut backend, "a", &["ch".into()]).unwrap();
        assert!(subscriptions(&mut backend, "a").unwrap().is_empty());
        // Calling it again must be a no-op, not an error.
        unsubscribe(&mut backend, "a", &["ch".into()]).unwrap();
        assert!(subscriptions(&mut backend, "a").unwrap().is_empty());
    }

    #[test]
    fn zero_subscriber_collection_removes_messages_and_ids() {
        let mut backend = InMemoryBackend::new();
        subscribe(&mut backend, "a", &["ch".into()], IndexPolicy::Current, 1_000).unwrap();
        write_n(&mut backend, "a", "ch", 3, "m");
        unsubscribe(&mut backend, "a", &["ch".into()]).unwrap();

        assert_eq!(backend.zcard(&key_schema::messages("ch")).unwrap(), 0);
        // ids(ch) was deleted: the next writer starts again from 1.
        let env = write(&mut backend, "b", "ch", "fresh", 1_000).unwrap();
        assert_eq!(env.id, 1);
    }

    #[test]
    fn current_resubscribe_is_a_no_op() {
        let mut backend = InMemoryBackend::new();
        subscribe(&mut backend, "a", &["ch".into()], IndexPolicy::Current, 1_000).unwrap();
        write_n(&mut backend, "a", "ch", 5, "m");
        read(&mut backend, "a", 10, 4096).unwrap();

        // Re-subscribing with CURRENT must not reset the cursor back to 0.
        subscribe(&mut backend, "a", &["ch".into()], IndexPolicy::Current, 1_000).unwrap();
        let msgs = read(&mut backend, "a", 10, 4096).unwrap();
        assert!(!msgs.contains_key("ch"), "CURRENT resubscribe must not replay history");
    }

    #[test]
    fn compact_trims_regardless_of_hysteresis() {
        let mut backend = InMemoryBackend::new();
        subscribe(&mut backend, "a", &["ch".into()], IndexPolicy::Current, 1_000).unwrap();
        write_n(&mut backend, "a", "ch", 5, "m");
        read(&mut backend, "a", 10, 4096).unwrap();

        compact(&mut backend, "ch").unwrap();
        assert_eq!(backend.zcard(&key_schema::messages("ch")).unwrap(), 0);
    }
}
