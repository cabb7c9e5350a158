//! Redis-list queue backend.
//!
//! `LPUSH`/`BRPOP` over a named list. The blocking pop uses a bounded
//! server-side wait and loops, so cancellation is observed at least once per
//! long-poll window; popping removes the message, which is the
//! delete-before-process behavior the pipeline is built around.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio_util::sync::CancellationToken;

use crate::Result;

use super::QueueBackend;

const LONG_POLL: Duration = Duration::from_secs(20);

pub struct RedisQueue {
    client: redis::Client,
    queue: String,
}

impl RedisQueue {
    pub fn connect(url: &str, queue: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
            queue: queue.into(),
        })
    }

    async fn conn(&self) -> Result<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl QueueBackend for RedisQueue {
    async fn push(&self, payload: String) -> Result<()> {
        let mut conn = self.conn().await?;
        redis::cmd("LPUSH")
            .arg(&self.queue)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn pop(&self, cancel: &CancellationToken) -> Result<Option<String>> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let mut conn = self.conn().await?;
            let mut cmd = redis::cmd("BRPOP");
            cmd.arg(&self.queue).arg(LONG_POLL.as_secs());
            let receive = cmd.query_async::<Option<(String, String)>>(&mut conn);

            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                reply = receive => match reply? {
                    Some((_, payload)) => return Ok(Some(payload)),
                    // Long-poll window elapsed with nothing queued.
                    None => continue,
                },
            }
        }
    }
}
