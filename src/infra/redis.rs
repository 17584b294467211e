//! Redis adapter for the store traits.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{Client, Cmd, RedisError, Script};
use tracing::debug;

use crate::domain::query::{Aggregate, Operator, ScoreRange, SortOrder};
use crate::domain::range::{Page, RangeItems, ScoredMember};
use crate::domain::weighted_key::WeightedKey;
use crate::store::{BitmapStore, KeyspaceStore, SortedSetStore, StoreError};

/// KEYS: id_to_offset, offset_to_id, counter. ARGV: id.
///
/// Offsets start at zero, hence the `- 1` after `INCR`.
static ASSIGN_OFFSET: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        local offset = redis.call('HGET', KEYS[1], ARGV[1])
        if not offset then
            offset = redis.call('INCR', KEYS[3]) - 1
            redis.call('HSET', KEYS[1], ARGV[1], offset)
            redis.call('HSET', KEYS[2], offset, ARGV[1])
        end
        return tonumber(offset)
        ",
    )
});

fn classify(command: &'static str) -> impl FnOnce(RedisError) -> StoreError {
    move |err| {
        if err.is_timeout() {
            StoreError::Timeout
        } else if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
            StoreError::connection(err.to_string())
        } else if err.kind() == redis::ErrorKind::TypeError {
            StoreError::protocol(format!("{command}: {err}"))
        } else {
            StoreError::command(command, err.to_string())
        }
    }
}

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        classify("UNKNOWN")(err)
    }
}

/// Store backed by a Redis server through a reconnecting connection manager.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|err| StoreError::connection(err.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(classify("CONNECT"))?;
        debug!(url, "Connected to redis");
        Ok(Self { connection })
    }

    async fn query<T: redis::FromRedisValue>(
        &self,
        command: &'static str,
        cmd: &Cmd,
    ) -> Result<T, StoreError> {
        let mut connection = self.connection.clone();
        cmd.query_async(&mut connection)
            .await
            .map_err(classify(command))
    }

    async fn read_items(
        &self,
        command: &'static str,
        cmd: &Cmd,
        with_scores: bool,
    ) -> Result<RangeItems, StoreError> {
        if with_scores {
            let pairs: Vec<(String, f64)> = self.query(command, cmd).await?;
            let items = pairs
                .into_iter()
                .map(|(member, score)| ScoredMember { member, score })
                .collect();
            Ok(RangeItems::WithScores(items))
        } else {
            let members: Vec<String> = self.query(command, cmd).await?;
            Ok(RangeItems::Members(members))
        }
    }
}

#[async_trait]
impl KeyspaceStore for RedisStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let found: i64 = self.query("EXISTS", redis::cmd("EXISTS").arg(key)).await?;
        Ok(found > 0)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, StoreError> {
        let applied: i64 = self
            .query("EXPIRE", redis::cmd("EXPIRE").arg(key).arg(seconds))
            .await?;
        Ok(applied == 1)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let removed: i64 = self.query("DEL", redis::cmd("DEL").arg(key)).await?;
        Ok(removed > 0)
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let remaining: i64 = self.query("TTL", redis::cmd("TTL").arg(key)).await?;
        Ok(u64::try_from(remaining).ok())
    }
}

#[async_trait]
impl SortedSetStore for RedisStore {
    async fn combine_and_expire(
        &self,
        dest: &str,
        operator: Operator,
        sources: &[WeightedKey],
        aggregate: Aggregate,
        expire_seconds: u64,
    ) -> Result<(), StoreError> {
        let command = match operator {
            Operator::Union => "ZUNIONSTORE",
            Operator::Intersect => "ZINTERSTORE",
        };

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd(command).arg(dest).arg(sources.len());
        for source in sources {
            pipe.arg(source.key());
        }
        pipe.arg("WEIGHTS");
        for source in sources {
            pipe.arg(source.weight());
        }
        pipe.arg("AGGREGATE").arg(aggregate.as_str()).ignore();
        pipe.cmd("EXPIRE").arg(dest).arg(expire_seconds).ignore();

        let mut connection = self.connection.clone();
        let () = pipe
            .query_async(&mut connection)
            .await
            .map_err(classify(command))?;
        Ok(())
    }

    async fn card(&self, key: &str) -> Result<u64, StoreError> {
        self.query("ZCARD", redis::cmd("ZCARD").arg(key)).await
    }

    async fn count_in(&self, key: &str, range: &ScoreRange) -> Result<u64, StoreError> {
        self.query(
            "ZCOUNT",
            redis::cmd("ZCOUNT")
                .arg(key)
                .arg(range.min.to_string())
                .arg(range.max.to_string()),
        )
        .await
    }

    async fn range_by_rank(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        order: SortOrder,
        with_scores: bool,
    ) -> Result<RangeItems, StoreError> {
        let command = if order.is_descending() {
            "ZREVRANGE"
        } else {
            "ZRANGE"
        };
        let mut cmd = redis::cmd(command);
        cmd.arg(key).arg(start).arg(stop);
        if with_scores {
            cmd.arg("WITHSCORES");
        }
        self.read_items(command, &cmd, with_scores).await
    }

    async fn range_by_score(
        &self,
        key: &str,
        range: &ScoreRange,
        order: SortOrder,
        page: Option<Page>,
        with_scores: bool,
    ) -> Result<RangeItems, StoreError> {
        // The reverse form takes the upper bound first.
        let (command, first, second) = if order.is_descending() {
            ("ZREVRANGEBYSCORE", range.max, range.min)
        } else {
            ("ZRANGEBYSCORE", range.min, range.max)
        };
        let mut cmd = redis::cmd(command);
        cmd.arg(key).arg(first.to_string()).arg(second.to_string());
        if with_scores {
            cmd.arg("WITHSCORES");
        }
        if let Some(page) = page {
            cmd.arg("LIMIT").arg(page.offset).arg(page.limit);
        }
        self.read_items(command, &cmd, with_scores).await
    }

    async fn add(&self, key: &str, member: &str, score: f64) -> Result<bool, StoreError> {
        let added: i64 = self
            .query("ZADD", redis::cmd("ZADD").arg(key).arg(score).arg(member))
            .await?;
        Ok(added > 0)
    }

    async fn remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let removed: i64 = self
            .query("ZREM", redis::cmd("ZREM").arg(key).arg(member))
            .await?;
        Ok(removed > 0)
    }
}

#[async_trait]
impl BitmapStore for RedisStore {
    async fn assign_offset(
        &self,
        id_to_offset: &str,
        offset_to_id: &str,
        counter: &str,
        id: &str,
    ) -> Result<u64, StoreError> {
        let mut invocation = ASSIGN_OFFSET.prepare_invoke();
        invocation
            .key(id_to_offset)
            .key(offset_to_id)
            .key(counter)
            .arg(id);
        let mut connection = self.connection.clone();
        let offset: i64 = invocation
            .invoke_async(&mut connection)
            .await
            .map_err(classify("EVALSHA"))?;
        u64::try_from(offset)
            .map_err(|_| StoreError::protocol(format!("negative offset {offset} for `{id}`")))
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.query("HGET", redis::cmd("HGET").arg(key).arg(field))
            .await
    }

    async fn counter(&self, key: &str) -> Result<Option<u64>, StoreError> {
        self.query("GET", redis::cmd("GET").arg(key)).await
    }

    async fn set_bit(&self, key: &str, offset: u64, value: bool) -> Result<bool, StoreError> {
        let previous: i64 = self
            .query(
                "SETBIT",
                redis::cmd("SETBIT").arg(key).arg(offset).arg(u8::from(value)),
            )
            .await?;
        Ok(previous == 1)
    }

    async fn get_bit(&self, key: &str, offset: u64) -> Result<bool, StoreError> {
        let bit: i64 = self
            .query("GETBIT", redis::cmd("GETBIT").arg(key).arg(offset))
            .await?;
        Ok(bit == 1)
    }

    async fn bit_count(&self, key: &str) -> Result<u64, StoreError> {
        self.query("BITCOUNT", redis::cmd("BITCOUNT").arg(key)).await
    }

    async fn bit_or(&self, dest: &str, sources: &[String]) -> Result<u64, StoreError> {
        self.query(
            "BITOP",
            redis::cmd("BITOP").arg("OR").arg(dest).arg(sources),
        )
        .await
    }
}
