//! An in-process fake of the Backend Adapter, used by the unit test suite
//! to exercise the full Channel Protocol (subscribe/write/read/unsubscribe,
//! GC, cursor mirroring) without a live Redis server.

use std::collections::{BTreeMap, HashMap};

use super::{Backend, PipelineOp, PipelineValue, ScoredMember};
use crate::error::Result;

#[derive(Default)]
pub struct InMemoryBackend {
    counters: HashMap<String, u64>,
    sorted_sets: HashMap<String, BTreeMap<String, u64>>,
    locks: HashMap<String, String>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        InMemoryBackend::default()
    }

    fn apply(&mut self, op: &PipelineOp) -> PipelineValue {
        match op {
            PipelineOp::ZAdd { key, member, score } => {
                self.sorted_sets
                    .entry(key.clone())
                    .or_default()
                    .insert(member.clone(), *score);
                PipelineValue::Done
            }
            PipelineOp::ZRem { key, member } => {
                if let Some(set) = self.sorted_sets.get_mut(key) {
                    set.remove(member);
                }
                PipelineValue::Done
            }
            PipelineOp::ZRemRangeByScore { key, min, max } => {
                if let Some(set) = self.sorted_sets.get_mut(key) {
                    set.retain(|_, score| !(*score >= *min && *score <= *max));
                }
                PipelineValue::Done
            }
            PipelineOp::Del { key } => {
                self.sorted_sets.remove(key);
                self.counters.remove(key);
                PipelineValue::Done
            }
            PipelineOp::ZCard { key } => {
                let count = self.sorted_sets.get(key).map(|s| s.len()).unwrap_or(0);
                PipelineValue::Int(count as i64)
            }
        }
    }
}

impl Backend for InMemoryBackend {
    fn incr(&mut self, key: &str) -> Result<u64> {
        let counter = self.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    fn zrange_with_scores(&mut self, key: &str) -> Result<Vec<ScoredMember>> {
        let mut members: Vec<ScoredMember> = self
            .sorted_sets
            .get(key)
            .map(|set| {
                set.iter()
                    .map(|(member, score)| ScoredMember {
                        member: member.clone(),
                        score: *score,
                    })
                    .collect()
            })
            .unwrap_or_default();
        members.sort_by_key(|m| m.score);
        Ok(members)
    }

    fn zrange_by_score(&mut self, key: &str, min_exclusive: u64, max: u64) -> Result<Vec<String>> {
        let mut matches: Vec<(u64, String)> = self
            .sorted_sets
            .get(key)
            .map(|set| {
                set.iter()
                    .filter(|(_, score)| **score > min_exclusive && **score <= max)
                    .map(|(member, score)| (*score, member.clone()))
                    .collect()
            })
            .unwrap_or_default();
        matches.sort_by_key(|(score, _)| *score);
        Ok(matches.into_iter().map(|(_, member)| member).collect())
    }

    fn zcard(&mut self, key: &str) -> Result<u64> {
        Ok(self.sorted_sets.get(key).map(|s| s.len() as u64).unwrap_or(0))
    }

    fn exec_pipeline(&mut self, ops: &[PipelineOp]) -> Result<Vec<PipelineValue>> {
        Ok(ops.iter().map(|op| self.apply(op)).collect())
    }

    fn try_acquire_lock(&mut self, name: &str, _ttl_ms: u64) -> Result<Option<String>> {
        if self.locks.contains_key(name) {
            return Ok(None);
        }
        let token = super::lock::new_token();
        self.locks.insert(name.to_string(), token.clone());
        Ok(Some(token))
    }

    fn release_lock(&mut self, name: &str, token: &str) -> Result<()> {
        if self.locks.get(name).map(|t| t.as_str()) == Some(token) {
            self.locks.remove(name);
        }
        Ok(())
    }

    fn ping(&mut self) -> Result<()> {
        Ok(())
    }
}
