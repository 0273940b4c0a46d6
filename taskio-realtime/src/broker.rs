//! Redis Streams bridge between collaborator services and the live session
//! registry.
//!
//! Producers `XADD` [`PushMessage`] envelopes onto a length-capped stream.
//! Every gateway instance joins the same consumer group under a distinct
//! consumer name, so each entry is handed to exactly one instance, which
//! pushes to whichever of the addressed users are connected to it.
//! Delivery is at-least-once: entries are acknowledged after the handler
//! runs, whatever the outcome, and duplicates are tolerated downstream.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use taskio_core::config::Config;
use taskio_core::metrics;
use taskio_core::{Error, Result};

use crate::events::PushMessage;

/// Bound on any single Redis command the bridge issues
const REDIS_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// First retry delay after a failed poll; doubles per failure up to the cap
const BACKOFF_FLOOR: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Receives messages pulled off the stream by the consume loop.
///
/// A returned error is logged and counted; the entry is acknowledged and the
/// loop moves on. Notifications are state refreshes, not commands, so
/// skip-and-continue beats stalling the stream.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: PushMessage) -> Result<()>;
}

/// Producer and consumer halves of the notification stream.
pub struct StreamBridge {
    client: Client,
    stream: String,
    group: String,
    consumer: String,
    poll_interval: Duration,
    batch_size: usize,
    startup_timeout: Duration,
    max_stream_len: usize,

    /// Producer connection, established by `start`.
    producer: OnceCell<ConnectionManager>,
    cancel_token: CancellationToken,
    consume_task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamBridge {
    /// Build from configuration. `consumer` names this instance inside the
    /// consumer group and must be distinct per instance.
    pub fn from_config(config: &Config, consumer: String) -> Result<Self> {
        if config.redis.url.is_empty() {
            return Err(Error::Config(
                "broker requires redis.url to be set".to_string(),
            ));
        }
        let client = Client::open(config.redis.url.as_str())?;

        // The stream shares the cache's namespace prefix.
        let stream = if config.redis.key_prefix.is_empty() {
            config.broker.stream.clone()
        } else {
            format!("{}:{}", config.redis.key_prefix, config.broker.stream)
        };

        Ok(Self {
            client,
            stream,
            group: config.broker.group.clone(),
            consumer,
            poll_interval: Duration::from_millis(config.broker.poll_interval_ms),
            batch_size: config.broker.batch_size,
            startup_timeout: Duration::from_secs(config.broker.startup_timeout_seconds),
            max_stream_len: config.broker.max_stream_len,
            producer: OnceCell::new(),
            cancel_token: CancellationToken::new(),
            consume_task: Mutex::new(None),
        })
    }

    /// Connect to the broker and spawn the consume loop.
    ///
    /// Creates the stream and consumer group idempotently. Fails if the
    /// connections cannot be established within the startup timeout; the
    /// owning process must treat that as fatal rather than accept traffic
    /// it cannot fan out.
    pub async fn start(&self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        // Separate producer and consumer connections: XREADGROUP BLOCK
        // occupies its connection for up to one poll interval, and publishes
        // must not queue behind it.
        let (producer, consumer_conn) = timeout(self.startup_timeout, async {
            let mut producer = self.client.get_connection_manager().await?;
            self.create_group(&mut producer).await?;
            let consumer_conn = self.client.get_connection_manager().await?;
            Ok::<_, Error>((producer, consumer_conn))
        })
        .await
        .map_err(|_| {
            Error::Broker(format!(
                "timed out connecting to the broker after {}s",
                self.startup_timeout.as_secs()
            ))
        })??;

        self.producer
            .set(producer)
            .map_err(|_| Error::Broker("bridge already started".to_string()))?;

        let handle = tokio::spawn(consume_loop(
            consumer_conn,
            self.stream.clone(),
            self.group.clone(),
            self.consumer.clone(),
            self.poll_interval,
            self.batch_size,
            handler,
            self.cancel_token.clone(),
        ));
        *self.consume_task.lock().await = Some(handle);

        info!(
            stream = %self.stream,
            group = %self.group,
            consumer = %self.consumer,
            "Broker bridge started"
        );
        Ok(())
    }

    /// `XGROUP CREATE ... MKSTREAM`, tolerating a group that already exists.
    async fn create_group(&self, conn: &mut ConnectionManager) -> Result<()> {
        let created: std::result::Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(&self.stream, &self.group, "$")
            .await;

        match created {
            Ok(()) => {
                info!(stream = %self.stream, group = %self.group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(stream = %self.stream, group = %self.group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Serialize and `XADD` a message, returning the stream entry id.
    ///
    /// The stream is capped with `MAXLEN ~`; a failed publish is the
    /// caller's to handle, never silently dropped.
    pub async fn publish(&self, message: &PushMessage) -> Result<String> {
        let Some(producer) = self.producer.get() else {
            return Err(Error::Broker("bridge not started".to_string()));
        };
        let payload = message.encode()?;
        let mut conn = producer.clone();

        let entry_id: String = timeout(
            REDIS_OP_TIMEOUT,
            conn.xadd_maxlen(
                &self.stream,
                StreamMaxlen::Approx(self.max_stream_len),
                "*",
                &[("payload", payload.as_str())],
            ),
        )
        .await
        .map_err(|_| Error::Broker("timed out publishing to the notification stream".to_string()))??;

        metrics::broker::MESSAGES_PUBLISHED.inc();
        debug!(
            entry_id = %entry_id,
            event_type = %message.event.event_type,
            audience = message.users.len(),
            "Published notification to the stream"
        );
        Ok(entry_id)
    }

    /// Cancel the consume loop and await its exit.
    ///
    /// Safe to call if `start` failed part-way or was never called.
    pub async fn stop(&self) {
        self.cancel_token.cancel();
        let handle = self.consume_task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Broker consume loop task failed during shutdown");
            }
        }
        info!("Broker bridge stopped");
    }
}

impl std::fmt::Debug for StreamBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBridge")
            .field("stream", &self.stream)
            .field("group", &self.group)
            .field("consumer", &self.consumer)
            .finish()
    }
}

/// Long-lived consume loop: poll a batch, hand each entry to the handler,
/// acknowledge the batch, repeat. Poll failures back off exponentially;
/// cancellation is observed within one poll interval and the in-flight
/// batch is finished before returning.
#[allow(clippy::too_many_arguments)]
async fn consume_loop(
    mut conn: ConnectionManager,
    stream: String,
    group: String,
    consumer: String,
    poll_interval: Duration,
    batch_size: usize,
    handler: Arc<dyn MessageHandler>,
    cancel_token: CancellationToken,
) {
    let mut backoff = BACKOFF_FLOOR;

    info!(
        stream = %stream,
        group = %group,
        consumer = %consumer,
        "Broker consume loop started"
    );

    loop {
        let reply = tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Broker consume loop cancelled");
                return;
            }
            reply = poll_batch(&mut conn, &stream, &group, &consumer, poll_interval, batch_size) => reply,
        };

        match reply {
            Ok(reply) => {
                backoff = BACKOFF_FLOOR;

                let mut ack_ids = Vec::new();
                for stream_key in reply.keys {
                    for entry in stream_key.ids {
                        let payload = entry
                            .map
                            .get("payload")
                            .and_then(|v| redis::from_redis_value::<String>(v.clone()).ok());
                        match payload {
                            Some(payload) => dispatch(handler.as_ref(), &entry.id, &payload).await,
                            None => {
                                warn!(entry_id = %entry.id, "Stream entry has no payload field, skipping");
                            }
                        }
                        // Acknowledged regardless of handler outcome.
                        ack_ids.push(entry.id);
                    }
                }

                if !ack_ids.is_empty() {
                    ack_batch(&mut conn, &stream, &group, &ack_ids).await;
                }
            }
            Err(e) => {
                metrics::broker::POLL_ERRORS.inc();
                warn!(
                    error = %e,
                    backoff_secs = backoff.as_secs(),
                    "Broker poll failed, backing off before retry"
                );
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        info!("Broker consume loop cancelled during backoff");
                        return;
                    }
                    () = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(BACKOFF_CAP);
            }
        }
    }
}

/// One `XREADGROUP` poll with a bounded server-side block. The outer timeout
/// covers a hung connection; the `BLOCK` bound keeps cancellation responsive.
async fn poll_batch(
    conn: &mut ConnectionManager,
    stream: &str,
    group: &str,
    consumer: &str,
    poll_interval: Duration,
    batch_size: usize,
) -> Result<StreamReadReply> {
    let options = StreamReadOptions::default()
        .group(group, consumer)
        .block(poll_interval.as_millis() as usize)
        .count(batch_size);

    let reply: StreamReadReply = timeout(
        poll_interval + REDIS_OP_TIMEOUT,
        conn.xread_options(&[stream], &[">"], &options),
    )
    .await
    .map_err(|_| Error::Broker("timed out polling the notification stream".to_string()))??;

    Ok(reply)
}

/// Decode one stream entry and hand it to the handler. Never fails the
/// loop: undecodable entries and handler errors are logged and skipped.
async fn dispatch(handler: &dyn MessageHandler, entry_id: &str, payload: &str) {
    let message = match PushMessage::decode(payload) {
        Ok(message) => message,
        Err(e) => {
            warn!(
                entry_id = %entry_id,
                error = %e,
                "Undecodable stream entry, skipping"
            );
            return;
        }
    };

    metrics::broker::MESSAGES_CONSUMED.inc();
    debug!(
        entry_id = %entry_id,
        event_type = %message.event.event_type,
        audience = message.users.len(),
        "Dispatching stream message"
    );

    if let Err(e) = handler.handle(message).await {
        metrics::broker::HANDLER_ERRORS.inc();
        warn!(
            entry_id = %entry_id,
            error = %e,
            "Handler failed for stream message, skipping"
        );
    }
}

async fn ack_batch(conn: &mut ConnectionManager, stream: &str, group: &str, ids: &[String]) {
    let acked = timeout(
        REDIS_OP_TIMEOUT,
        conn.xack::<_, _, _, i64>(stream, group, ids),
    )
    .await;

    match acked {
        Ok(Ok(count)) => debug!(count, "Acknowledged stream entries"),
        Ok(Err(e)) => {
            warn!(error = %e, "Failed to acknowledge stream entries, redelivery possible");
        }
        Err(_) => warn!("Timed out acknowledging stream entries, redelivery possible"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{types, Event};
    use std::sync::Mutex as StdMutex;
    use taskio_core::models::{ProjectId, UserId};

    /// Records handled event types; fails on request.
    struct RecordingHandler {
        seen: StdMutex<Vec<String>>,
        fail_on_call: Option<usize>,
    }

    impl RecordingHandler {
        fn new(fail_on_call: Option<usize>) -> Self {
            Self {
                seen: StdMutex::new(Vec::new()),
                fail_on_call,
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn handle(&self, message: PushMessage) -> Result<()> {
            let call_index = {
                let mut seen = self.seen.lock().unwrap();
                seen.push(message.event.event_type.clone());
                seen.len()
            };
            if self.fail_on_call == Some(call_index) {
                return Err(Error::Internal("synthetic handler failure".to_string()));
            }
            Ok(())
        }
    }

    fn test_message(n: u32) -> PushMessage {
        let mut payload = serde_json::Map::new();
        payload.insert("seq".to_string(), serde_json::Value::from(n));
        PushMessage::new(
            vec![UserId::from_string("u1".to_string())],
            Event::for_project(
                types::TASK_UPDATED,
                ProjectId::from_string("p1".to_string()),
                payload,
            ),
        )
    }

    fn test_config(url: &str) -> Config {
        let mut config = Config::default();
        config.redis.url = url.to_string();
        config.broker.startup_timeout_seconds = 1;
        config.broker.poll_interval_ms = 100;
        config
    }

    #[tokio::test]
    async fn test_stop_before_start_is_safe() {
        let bridge =
            StreamBridge::from_config(&test_config("redis://127.0.0.1:6379"), "c1".to_string())
                .unwrap();
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_publish_before_start_errors() {
        let bridge =
            StreamBridge::from_config(&test_config("redis://127.0.0.1:6379"), "c1".to_string())
                .unwrap();
        let result = bridge.publish(&test_message(1)).await;
        assert!(matches!(result, Err(Error::Broker(_))));
    }

    #[tokio::test]
    async fn test_empty_redis_url_is_rejected() {
        let result = StreamBridge::from_config(&test_config(""), "c1".to_string());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_start_fails_within_startup_timeout_when_unreachable() {
        // Port 9 is discard; nothing is listening there.
        let bridge =
            StreamBridge::from_config(&test_config("redis://127.0.0.1:9"), "c1".to_string())
                .unwrap();

        let started = std::time::Instant::now();
        let result = bridge.start(Arc::new(RecordingHandler::new(None))).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));

        // stop() after a failed start must not hang or panic.
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_dispatch_swallows_handler_failure() {
        let handler = RecordingHandler::new(Some(2));

        let first = test_message(1).encode().unwrap();
        let second = test_message(2).encode().unwrap();
        let third = test_message(3).encode().unwrap();

        dispatch(&handler, "1-0", &first).await;
        dispatch(&handler, "1-1", &second).await; // handler errors here
        dispatch(&handler, "1-2", &third).await;

        assert_eq!(handler.seen().len(), 3);
    }

    #[tokio::test]
    async fn test_dispatch_skips_undecodable_entries() {
        let handler = RecordingHandler::new(None);

        dispatch(&handler, "1-0", "{ not json").await;
        dispatch(&handler, "1-1", &test_message(1).encode().unwrap()).await;

        assert_eq!(handler.seen().len(), 1);
    }

    #[tokio::test]
    #[ignore = "Requires Redis server"]
    async fn test_publish_consume_roundtrip_with_failing_handler() {
        let mut config = test_config("redis://127.0.0.1:6379");
        config.broker.stream = format!("taskio_test:stream:{}", nanoid::nanoid!(8));
        config.broker.startup_timeout_seconds = 5;

        let bridge = StreamBridge::from_config(&config, "consumer-1".to_string()).unwrap();
        let handler = Arc::new(RecordingHandler::new(Some(2)));
        bridge.start(handler.clone()).await.unwrap();

        for n in 1..=3 {
            bridge.publish(&test_message(n)).await.unwrap();
        }

        // All three entries are handed to the handler despite #2 failing.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while handler.seen().len() < 3 && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(handler.seen().len(), 3);

        // Cancellation is observed within roughly one poll interval.
        let stopped = std::time::Instant::now();
        bridge.stop().await;
        assert!(stopped.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    #[ignore = "Requires Redis server"]
    async fn test_group_creation_is_idempotent() {
        let mut config = test_config("redis://127.0.0.1:6379");
        config.broker.stream = format!("taskio_test:stream:{}", nanoid::nanoid!(8));
        config.broker.startup_timeout_seconds = 5;

        let first = StreamBridge::from_config(&config, "consumer-1".to_string()).unwrap();
        first.start(Arc::new(RecordingHandler::new(None))).await.unwrap();

        // Second instance joins the existing group (BUSYGROUP tolerated).
        let second = StreamBridge::from_config(&config, "consumer-2".to_string()).unwrap();
        second.start(Arc::new(RecordingHandler::new(None))).await.unwrap();

        first.stop().await;
        second.stop().await;
    }
}
