use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use rand::Rng;
use tracing::debug;

/// Wrong guesses allowed before a code is burned.
pub const MAX_VERIFY_ATTEMPTS: u32 = 5;
pub const CODE_LENGTH: usize = 6;

const KEY_PREFIX: &str = "hireflow:otp";

/// Counts the attempt, then consumes the code on a match or once the
/// attempts are used up. Expiry is left to the key TTL.
///
/// KEYS: otp hash. ARGV: submitted code, max attempts.
const VERIFY_SCRIPT: &str = r#"
local code = redis.call('HGET', KEYS[1], 'code')
if not code then
  return 0
end
local max = tonumber(ARGV[2])
local attempts = redis.call('HINCRBY', KEYS[1], 'attempts', 1)
if attempts > max then
  redis.call('DEL', KEYS[1])
  return 0
end
if code == ARGV[1] then
  redis.call('DEL', KEYS[1])
  return 1
end
if attempts >= max then
  redis.call('DEL', KEYS[1])
end
return 0
"#;

#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// One-time codes keyed by a case-insensitive identifier (an email address).
#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Issues a fresh code, replacing any outstanding one.
    async fn issue(&self, identifier: &str) -> Result<String, OtpError>;

    async fn verify(&self, identifier: &str, code: &str) -> Result<bool, OtpError>;
}

pub fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

/// Six decimal digits, uniform over the whole range.
pub fn generate_code() -> String {
    let n = rand::thread_rng().gen_range(0..10u32.pow(CODE_LENGTH as u32));
    format!("{n:0width$}", width = CODE_LENGTH)
}

#[derive(Clone)]
pub struct RedisOtpStore {
    conn: MultiplexedConnection,
    ttl: Duration,
    verify_script: redis::Script,
}

impl RedisOtpStore {
    pub async fn connect(client: &redis::Client, ttl: Duration) -> Result<Self, OtpError> {
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            ttl,
            verify_script: redis::Script::new(VERIFY_SCRIPT),
        })
    }

    fn key(identifier: &str) -> String {
        format!("{KEY_PREFIX}:{}", normalize_identifier(identifier))
    }
}

#[async_trait]
impl OtpStore for RedisOtpStore {
    async fn issue(&self, identifier: &str) -> Result<String, OtpError> {
        let key = Self::key(identifier);
        let code = generate_code();
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .hset_multiple(&key, &[("code", code.as_str()), ("attempts", "0")])
            .ignore()
            .expire(&key, self.ttl.as_secs().max(1) as i64)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        debug!(%key, "OTP issued");
        Ok(code)
    }

    async fn verify(&self, identifier: &str, code: &str) -> Result<bool, OtpError> {
        let mut conn = self.conn.clone();
        let matched: i64 = self
            .verify_script
            .key(Self::key(identifier))
            .arg(code.trim())
            .arg(MAX_VERIFY_ATTEMPTS)
            .invoke_async(&mut conn)
            .await?;
        Ok(matched == 1)
    }
}
