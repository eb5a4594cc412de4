use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde_json::Value;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{
    Backoff, Delivery, EnqueueOptions, FailOutcome, JobQueue, JobState, JobStatusInfo, QueueError,
    QueueName,
};

const KEY_PREFIX: &str = "hireflow";
/// Writes a fresh job hash and pushes the id, unless the id is still live.
///
/// KEYS: job hash, wait list, delayed zset.
/// ARGV: job id, then field/value pairs.
const ENQUEUE_SCRIPT: &str = r#"
local state = redis.call('HGET', KEYS[1], 'state')
if state == 'pending' or state == 'active' then
  return 0
end
redis.call('DEL', KEYS[1])
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('HSET', KEYS[1], unpack(ARGV, 2))
redis.call('LPUSH', KEYS[2], ARGV[1])
return 1
"#;

const COMPLETED_RETENTION_SECS: i64 = 24 * 60 * 60;
const FAILED_RETENTION_SECS: i64 = 7 * 24 * 60 * 60;

/// Promotes due delayed jobs, requeues jobs whose lease ran out, then pops
/// the oldest waiting job and leases it under a new token. A job whose last
/// allowed attempt lost its lease comes back flagged as exhausted and does not
/// count as a new attempt.
///
/// KEYS: wait list, delayed zset, active zset.
/// ARGV: now (ms), lease (ms), job hash key prefix, lease token.
const RESERVE_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local prefix = ARGV[3]

local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', now)
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[2], id)
  redis.call('LPUSH', KEYS[1], id)
  redis.call('HSET', prefix .. id, 'state', 'pending')
end

local expired = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', now)
for _, id in ipairs(expired) do
  redis.call('ZREM', KEYS[3], id)
  redis.call('HSET', prefix .. id, 'state', 'pending', 'lease', '')
  redis.call('RPUSH', KEYS[1], id)
end

while true do
  local id = redis.call('RPOP', KEYS[1])
  if not id then
    return false
  end
  local key = prefix .. id
  local payload = redis.call('HGET', key, 'payload')
  if payload then
    local made = tonumber(redis.call('HGET', key, 'attempts_made') or '0')
    local max = tonumber(redis.call('HGET', key, 'max_attempts') or '1')
    local exhausted = 0
    if made >= max then
      exhausted = 1
    else
      made = redis.call('HINCRBY', key, 'attempts_made', 1)
    end
    redis.call('ZADD', KEYS[3], now + tonumber(ARGV[2]), id)
    redis.call('HSET', key, 'state', 'active', 'lease', ARGV[4])
    return {id, payload, made, max, exhausted}
  end
end
"#;

/// KEYS: job hash. ARGV: lease token, progress.
const PROGRESS_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return -1
end
if redis.call('HGET', KEYS[1], 'lease') ~= ARGV[1] then
  return 0
end
redis.call('HSET', KEYS[1], 'progress', ARGV[2])
return 1
"#;

/// KEYS: job hash, active zset.
/// ARGV: job id, lease token, result json, retention (s).
const COMPLETE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return -1
end
if redis.call('HGET', KEYS[1], 'lease') ~= ARGV[2] then
  return 0
end
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HSET', KEYS[1], 'state', 'completed', 'progress', '100', 'result', ARGV[3], 'lease', '')
redis.call('EXPIRE', KEYS[1], ARGV[4])
return 1
"#;

/// Schedules a retry when a due time is given, otherwise fails the job for
/// good.
///
/// KEYS: job hash, active zset, delayed zset.
/// ARGV: job id, lease token, reason, retry due (ms) or '', retention (s).
const FAIL_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return -1
end
if redis.call('HGET', KEYS[1], 'lease') ~= ARGV[2] then
  return 0
end
redis.call('ZREM', KEYS[2], ARGV[1])
if ARGV[4] ~= '' then
  redis.call('HSET', KEYS[1], 'state', 'pending', 'failed_reason', ARGV[3], 'lease', '')
  redis.call('ZADD', KEYS[3], tonumber(ARGV[4]), ARGV[1])
else
  redis.call('HSET', KEYS[1], 'state', 'failed', 'failed_reason', ARGV[3], 'lease', '')
  redis.call('EXPIRE', KEYS[1], ARGV[5])
end
return 1
"#;

/// Maps a lease-checked script reply: -1 unknown job, 0 lease lost.
fn lease_checked(job_id: Uuid, reply: i64) -> Result<(), QueueError> {
    match reply {
        -1 => Err(QueueError::UnknownJob(job_id)),
        0 => Err(QueueError::LostLease(job_id)),
        _ => Ok(()),
    }
}

/// Redis-backed [`JobQueue`].
///
/// Per queue: a wait list, a delayed zset scored by due time, an active zset
/// scored by lease deadline, and one hash per job.
#[derive(Clone)]
pub struct RedisQueue {
    conn: MultiplexedConnection,
    enqueue_script: redis::Script,
    reserve_script: redis::Script,
    progress_script: redis::Script,
    complete_script: redis::Script,
    fail_script: redis::Script,
}

impl RedisQueue {
    pub async fn connect(client: &redis::Client) -> Result<Self, QueueError> {
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            enqueue_script: redis::Script::new(ENQUEUE_SCRIPT),
            reserve_script: redis::Script::new(RESERVE_SCRIPT),
            progress_script: redis::Script::new(PROGRESS_SCRIPT),
            complete_script: redis::Script::new(COMPLETE_SCRIPT),
            fail_script: redis::Script::new(FAIL_SCRIPT),
        })
    }

    fn wait_key(queue: QueueName) -> String {
        format!("{KEY_PREFIX}:{queue}:wait")
    }

    fn delayed_key(queue: QueueName) -> String {
        format!("{KEY_PREFIX}:{queue}:delayed")
    }

    fn active_key(queue: QueueName) -> String {
        format!("{KEY_PREFIX}:{queue}:active")
    }

    fn job_prefix(queue: QueueName) -> String {
        format!("{KEY_PREFIX}:{queue}:job:")
    }

    fn job_key(queue: QueueName, job_id: Uuid) -> String {
        format!("{}{job_id}", Self::job_prefix(queue))
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl JobQueue for RedisQueue {
    #[instrument(skip(self, payload), fields(queue = %queue))]
    async fn enqueue(
        &self,
        queue: QueueName,
        job_id: Uuid,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<bool, QueueError> {
        let fields = [
            ("payload", serde_json::to_string(&payload)?),
            ("state", JobState::Pending.as_str().to_string()),
            ("attempts_made", "0".to_string()),
            ("max_attempts", options.attempts.max(1).to_string()),
            ("backoff", serde_json::to_string(&options.backoff)?),
            ("progress", "0".to_string()),
            ("created_at", Utc::now().to_rfc3339()),
        ];

        let mut invocation = self.enqueue_script.prepare_invoke();
        invocation
            .key(Self::job_key(queue, job_id))
            .key(Self::wait_key(queue))
            .key(Self::delayed_key(queue))
            .arg(job_id.to_string());
        for (field, value) in &fields {
            invocation.arg(*field).arg(value);
        }

        let mut conn = self.conn.clone();
        let added: i64 = invocation.invoke_async(&mut conn).await?;
        if added == 1 {
            debug!(%job_id, "Job enqueued");
        } else {
            debug!(%job_id, "Job already queued, skipping");
        }
        Ok(added == 1)
    }

    async fn reserve(
        &self,
        queue: QueueName,
        lease: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.conn.clone();
        let token = Uuid::new_v4();
        let reserved: Option<(String, String, i64, i64, i64)> = self
            .reserve_script
            .key(Self::wait_key(queue))
            .key(Self::delayed_key(queue))
            .key(Self::active_key(queue))
            .arg(now_ms())
            .arg(lease.as_millis() as i64)
            .arg(Self::job_prefix(queue))
            .arg(token.to_string())
            .invoke_async(&mut conn)
            .await?;

        let Some((id, payload, attempt, max_attempts, exhausted)) = reserved else {
            return Ok(None);
        };
        let id = Uuid::parse_str(&id).map_err(|e| QueueError::Corrupt(format!("job id: {e}")))?;

        Ok(Some(Delivery {
            id,
            queue,
            payload: serde_json::from_str(&payload)?,
            attempt: attempt.max(1) as u32,
            max_attempts: max_attempts.max(1) as u32,
            lease: token,
            exhausted: exhausted == 1,
        }))
    }

    async fn report_progress(
        &self,
        queue: QueueName,
        job_id: Uuid,
        lease: Uuid,
        progress: u8,
    ) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let reply: i64 = self
            .progress_script
            .key(Self::job_key(queue, job_id))
            .arg(lease.to_string())
            .arg(progress.min(100))
            .invoke_async(&mut conn)
            .await?;
        lease_checked(job_id, reply)
    }

    #[instrument(skip(self, result), fields(queue = %queue))]
    async fn complete(
        &self,
        queue: QueueName,
        job_id: Uuid,
        lease: Uuid,
        result: Value,
    ) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let reply: i64 = self
            .complete_script
            .key(Self::job_key(queue, job_id))
            .key(Self::active_key(queue))
            .arg(job_id.to_string())
            .arg(lease.to_string())
            .arg(serde_json::to_string(&result)?)
            .arg(COMPLETED_RETENTION_SECS)
            .invoke_async(&mut conn)
            .await?;
        lease_checked(job_id, reply)
    }

    #[instrument(skip(self), fields(queue = %queue))]
    async fn fail(
        &self,
        queue: QueueName,
        job_id: Uuid,
        lease: Uuid,
        reason: &str,
        retryable: bool,
    ) -> Result<FailOutcome, QueueError> {
        let mut conn = self.conn.clone();
        let key = Self::job_key(queue, job_id);
        let (attempts_made, max_attempts, backoff): (Option<u32>, Option<u32>, Option<String>) =
            redis::cmd("HMGET")
                .arg(&key)
                .arg("attempts_made")
                .arg("max_attempts")
                .arg("backoff")
                .query_async(&mut conn)
                .await?;

        let (Some(attempts_made), Some(max_attempts)) = (attempts_made, max_attempts) else {
            return Err(QueueError::UnknownJob(job_id));
        };
        let backoff: Backoff = match backoff {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Backoff::None,
        };

        // attempts_made only moves on reserve, which also replaces the token,
        // so the script's lease check keeps this decision current.
        let (outcome, due) = if retryable && attempts_made < max_attempts {
            let delay = backoff.delay_for(attempts_made);
            let due = now_ms() + delay.as_millis() as i64;
            let outcome = FailOutcome::Retrying {
                next_attempt: attempts_made + 1,
                delay,
            };
            (outcome, due.to_string())
        } else {
            (FailOutcome::Exhausted, String::new())
        };

        let reply: i64 = self
            .fail_script
            .key(&key)
            .key(Self::active_key(queue))
            .key(Self::delayed_key(queue))
            .arg(job_id.to_string())
            .arg(lease.to_string())
            .arg(reason)
            .arg(due)
            .arg(FAILED_RETENTION_SECS)
            .invoke_async(&mut conn)
            .await?;
        lease_checked(job_id, reply)?;
        Ok(outcome)
    }

    async fn status(
        &self,
        queue: QueueName,
        job_id: Uuid,
    ) -> Result<Option<JobStatusInfo>, QueueError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(Self::job_key(queue, job_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        parse_status(job_id, queue, &fields).map(Some)
    }
}

fn parse_status(
    job_id: Uuid,
    queue: QueueName,
    fields: &HashMap<String, String>,
) -> Result<JobStatusInfo, QueueError> {
    let get = |name: &str| fields.get(name).map(String::as_str);
    let number = |name: &str| get(name).and_then(|v| v.parse::<u32>().ok()).unwrap_or(0);

    let state = get("state")
        .unwrap_or("pending")
        .parse::<JobState>()
        .map_err(QueueError::Corrupt)?;
    let data = match get("payload") {
        Some(raw) => serde_json::from_str(raw)?,
        None => Value::Null,
    };
    let result = get("result").map(serde_json::from_str::<Value>).transpose()?;
    let created_at = get("created_at")
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok(JobStatusInfo {
        id: job_id,
        queue,
        state,
        progress: number("progress").min(100) as u8,
        attempts_made: number("attempts_made"),
        max_attempts: number("max_attempts"),
        data,
        result,
        failed_reason: get("failed_reason").map(str::to_string),
        created_at,
    })
}
