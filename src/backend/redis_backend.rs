//! The real Backend Adapter: a thin wrapper around a blocking
//! `redis::Connection` (spec §6.2). No invariant reasoning happens here,
//! only typed commands and pipelines.

use log::{debug, trace};
use redis::{Commands, Connection, Value};

use super::lock::{new_token, release_script};
use super::{Backend, PipelineOp, PipelineValue, ScoredMember};
use crate::error::{Error, Result};

pub struct RedisBackend {
    connection: Connection,
}

impl RedisBackend {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::ConnectionError(e.to_string()))?;
        let connection = client
            .get_connection()
            .map_err(|e| Error::ConnectionError(e.to_string()))?;
        Ok(RedisBackend { connection })
    }
}

impl Backend for RedisBackend {
    fn incr(&mut self, key: &str) -> Result<u64> {
        let value: i64 = self.connection.incr(key, 1)?;
        Ok(value as u64)
    }

    fn zrange_with_scores(&mut self, key: &str) -> Result<Vec<ScoredMember>> {
        let raw: Vec<(String, i64)> = self.connection.zrange_withscores(key, 0, -1)?;
        Ok(raw
            .into_iter()
            .map(|(member, score)| ScoredMember {
                member,
                score: score as u64,
            })
            .collect())
    }

    fn zrange_by_score(&mut self, key: &str, min_exclusive: u64, max: u64) -> Result<Vec<String>> {
        let min = format!("({min_exclusive}");
        let members: Vec<String> = self.connection.zrangebyscore(key, min, max)?;
        Ok(members)
    }

    fn zcard(&mut self, key: &str) -> Result<u64> {
        let card: u64 = self.connection.zcard(key)?;
        Ok(card)
    }

    fn exec_pipeline(&mut self, ops: &[PipelineOp]) -> Result<Vec<PipelineValue>> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                PipelineOp::ZAdd { key, member, score } => {
                    pipe.zadd(key, member, *score).ignore();
                }
                PipelineOp::ZRem { key, member } => {
                    pipe.zrem(key, member).ignore();
                }
                PipelineOp::ZRemRangeByScore { key, min, max } => {
                    pipe.zremrangebyscore(key, *min, *max).ignore();
                }
                PipelineOp::Del { key } => {
                    pipe.del(key).ignore();
                }
                PipelineOp::ZCard { key } => {
                    pipe.zcard(key);
                }
            }
        }
        trace!("executing pipeline with {} ops", ops.len());
        let replies: Vec<Value> = pipe.query(&mut self.connection)?;
        let mut replies = replies.into_iter();
        let mut values = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                PipelineOp::ZCard { .. } => {
                    let reply = replies
                        .next()
                        .ok_or_else(|| Error::backend("pipeline returned fewer replies than expected"))?;
                    let count: i64 = redis::from_redis_value(&reply)?;
                    values.push(PipelineValue::Int(count));
                }
                _ => values.push(PipelineValue::Done),
            }
        }
        Ok(values)
    }

    fn try_acquire_lock(&mut self, name: &str, ttl_ms: u64) -> Result<Option<String>> {
        let token = new_token();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(name)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query(&mut self.connection)?;
        if acquired.is_some() {
            debug!("acquired lock {name} with token {token}");
            Ok(Some(token))
        } else {
            Ok(None)
        }
    }

    fn release_lock(&mut self, name: &str, token: &str) -> Result<()> {
        let _: i64 = release_script()
            .key(name)
            .arg(token)
            .invoke(&mut self.connection)?;
        Ok(())
    }

    fn ping(&mut self) -> Result<()> {
        let _: String = redis::cmd("PING").query(&mut self.connection)?;
        Ok(())
    }
}
