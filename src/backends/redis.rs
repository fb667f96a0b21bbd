//! Redis-backed windows shared by every gateway instance.
//!
//! The whole read-check-increment step runs as one Lua script, so Redis
//! serializes concurrent requests for a key on its own. The hash
//! `{start, count}` gets its TTL only when a window is opened.

use super::{BackendError, BackendKind, RateBackend, RateWindow, Transition};
use crate::rate_limiter::Decision;
use ::redis::aio::MultiplexedConnection;
use ::redis::{Client, Script};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

const OPENED: i64 = 0;
const INCREMENTED: i64 = 1;
const EXHAUSTED: i64 = 2;

static CHECK_AND_CONSUME: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
local window = tonumber(ARGV[3])

local state = redis.call('HMGET', key, 'start', 'count')
local start = tonumber(state[1])
local count = tonumber(state[2])

if start == nil or count == nil or now - start >= window then
  redis.call('HSET', key, 'start', now, 'count', 1)
  redis.call('EXPIRE', key, window)
  return {0, now, 1}
end

if count >= limit then
  return {2, start, count}
end

count = redis.call('HINCRBY', key, 'count', 1)
return {1, start, count}
"#,
    )
});

pub const DEFAULT_KEY_PREFIX: &str = "formgate:rl:";

pub struct RedisBackend {
    client: Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    timeout: Duration,
    key_prefix: String,
}

impl fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBackend")
            .field("timeout", &self.timeout)
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Parse the URL without connecting. The connection is opened on first
    /// use and re-opened after any failure.
    pub fn new(redis_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::open(redis_url)?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            timeout,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        })
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn key(&self, client_key: &str) -> String {
        format!("{}{}", self.key_prefix, client_key)
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, ::redis::RedisError>>,
    {
        match tokio::time::timeout(self.timeout, op).await {
            Ok(result) => result.map_err(BackendError::from),
            Err(_) => Err(BackendError::Timeout(self.timeout.as_millis())),
        }
    }

    async fn connection(&self) -> Result<MultiplexedConnection, BackendError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self
            .bounded(self.client.get_multiplexed_async_connection())
            .await?;
        debug!("connected to redis");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn forget_connection(&self) {
        *self.connection.lock().await = None;
    }

    async fn eval_window(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
        now: u64,
    ) -> Result<Vec<i64>, BackendError> {
        let mut conn = self.connection().await?;
        let mut invocation = CHECK_AND_CONSUME.key(self.key(key));
        invocation.arg(now).arg(limit).arg(window_secs);

        let result = self
            .bounded(invocation.invoke_async::<_, Vec<i64>>(&mut conn))
            .await;
        if result.is_err() {
            self.forget_connection().await;
        }
        result
    }
}

fn transition_from_reply(reply: &[i64]) -> Result<Transition, BackendError> {
    let [status, start, count] = reply else {
        return Err(BackendError::Protocol(format!(
            "expected 3 integers from window script, got {}",
            reply.len()
        )));
    };

    let window = RateWindow {
        start: u64::try_from(*start)
            .map_err(|_| BackendError::Protocol(format!("negative window start {}", start)))?,
        count: u32::try_from(*count)
            .map_err(|_| BackendError::Protocol(format!("invalid window count {}", count)))?,
    };

    match *status {
        OPENED => Ok(Transition::Opened(window)),
        INCREMENTED => Ok(Transition::Incremented(window)),
        EXHAUSTED => Ok(Transition::Exhausted(window)),
        other => Err(BackendError::Protocol(format!(
            "unknown window status {}",
            other
        ))),
    }
}

#[async_trait]
impl RateBackend for RedisBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Redis
    }

    async fn check_and_consume(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
        now: u64,
    ) -> Result<Decision, BackendError> {
        let reply = self.eval_window(key, limit, window_secs, now).await?;
        let transition = transition_from_reply(&reply)?;
        Ok(transition.decision(limit, now, window_secs))
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let mut conn = self.connection().await?;
        let result = self
            .bounded(::redis::cmd("PING").query_async::<_, String>(&mut conn))
            .await;
        if result.is_err() {
            self.forget_connection().await;
        }
        result.map(|_| ())
    }
}
