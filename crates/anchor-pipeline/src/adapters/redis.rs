//! Stream broker adapter for a Redis-compatible broker
//!
//! Speaks the wire protocol directly over a tokio TCP connection: stream
//! discovery via `KEYS`, idempotent group creation via `XGROUP CREATE`
//! from position 0 (earliest unread), blocking multi-stream reads via
//! `XREADGROUP ... BLOCK`, and acknowledgement via `XACK`.
//!
//! The connection is established lazily and dropped on any I/O error, so
//! the next command reconnects. Reconnect pacing lives with the caller;
//! this adapter only reports `BrokerError` and never retries on its own.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::adapters::resp::{encode_command, read_value, RespValue};
use crate::error::BrokerError;
use crate::ports::{StreamBroker, StreamEntry};

/// Broker connection parameters.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
        }
    }
}

type Connection = BufReader<TcpStream>;

/// Redis Streams implementation of the broker capability.
pub struct RedisStreamBroker {
    config: RedisConfig,
    connection: Mutex<Option<Connection>>,
}

impl RedisStreamBroker {
    pub fn new(config: RedisConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<Connection, BrokerError> {
        let address = (self.config.host.as_str(), self.config.port);
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| BrokerError::Connection(format!("connect failed: {e}")))?;
        let mut connection = BufReader::new(stream);

        if let Some(password) = &self.config.password {
            let auth = encode_command(&["AUTH", password]);
            connection.get_mut().write_all(&auth).await?;
            match read_value(&mut connection).await? {
                RespValue::Simple(_) => {}
                RespValue::Error(e) => {
                    return Err(BrokerError::Connection(format!("auth rejected: {e}")))
                }
                other => {
                    return Err(BrokerError::Protocol(format!(
                        "unexpected auth reply: {other:?}"
                    )))
                }
            }
        }

        info!(host = %self.config.host, port = self.config.port, "broker connected");
        Ok(connection)
    }

    /// Send one command and read its reply. Protocol-level errors come
    /// back as `RespValue::Error`; I/O failures drop the connection.
    async fn command(
        &self,
        args: &[&str],
        read_timeout: Option<Duration>,
    ) -> Result<RespValue, BrokerError> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(connection) = guard.as_mut() else {
            return Err(BrokerError::Connection("no connection".to_string()));
        };

        let payload = encode_command(args);
        let exchange = async {
            connection.get_mut().write_all(&payload).await?;
            read_value(connection).await
        };

        let result = match read_timeout {
            Some(limit) => match tokio::time::timeout(limit, exchange).await {
                Ok(inner) => inner,
                Err(_) => {
                    *guard = None;
                    return Err(BrokerError::Connection(format!(
                        "no reply within {}s",
                        limit.as_secs()
                    )));
                }
            },
            None => exchange.await,
        };

        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                *guard = None;
                Err(BrokerError::Io(e))
            }
        }
    }
}

#[async_trait]
impl StreamBroker for RedisStreamBroker {
    async fn discover_streams(&self, pattern: &str) -> Result<Vec<String>, BrokerError> {
        match self.command(&["KEYS", pattern], None).await? {
            RespValue::Array(items) => {
                let mut streams: Vec<String> =
                    items.iter().filter_map(RespValue::as_text).collect();
                streams.sort();
                Ok(streams)
            }
            RespValue::Error(e) => Err(BrokerError::CommandRejected(e)),
            other => Err(BrokerError::Protocol(format!(
                "unexpected KEYS reply: {other:?}"
            ))),
        }
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BrokerError> {
        match self
            .command(&["XGROUP", "CREATE", stream, group, "0"], None)
            .await?
        {
            RespValue::Simple(_) => {
                info!(stream = %stream, group = %group, "consumer group created");
                Ok(())
            }
            // The group already exists; creation is idempotent.
            RespValue::Error(e) if e.starts_with("BUSYGROUP") => Ok(()),
            RespValue::Error(e) => Err(BrokerError::CommandRejected(e)),
            other => Err(BrokerError::Protocol(format!(
                "unexpected XGROUP reply: {other:?}"
            ))),
        }
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        streams: &[String],
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, BrokerError> {
        let count_text = count.to_string();
        let block_text = block.as_millis().to_string();

        let mut args: Vec<&str> = vec![
            "XREADGROUP", "GROUP", group, consumer, "COUNT", &count_text, "BLOCK", &block_text,
            "STREAMS",
        ];
        for stream in streams {
            args.push(stream.as_str());
        }
        for _ in streams {
            args.push(">");
        }

        // The server holds the reply for up to `block`; allow a grace
        // period on top before declaring the connection dead.
        let reply = self
            .command(&args, Some(block + Duration::from_secs(5)))
            .await?;
        let entries = parse_read_reply(reply)?;
        debug!(entries = entries.len(), "read returned");
        Ok(entries)
    }

    async fn ack(
        &self,
        stream: &str,
        group: &str,
        entry_ids: &[String],
    ) -> Result<(), BrokerError> {
        if entry_ids.is_empty() {
            return Ok(());
        }

        let mut args: Vec<&str> = vec!["XACK", stream, group];
        for id in entry_ids {
            args.push(id.as_str());
        }

        match self.command(&args, None).await? {
            RespValue::Integer(_) => Ok(()),
            RespValue::Error(e) => Err(BrokerError::CommandRejected(e)),
            other => Err(BrokerError::Protocol(format!(
                "unexpected XACK reply: {other:?}"
            ))),
        }
    }
}

/// Flatten the nested read reply into entries, preserving server order.
fn parse_read_reply(reply: RespValue) -> Result<Vec<StreamEntry>, BrokerError> {
    let streams = match reply {
        // Timeout with nothing to read.
        RespValue::Null => return Ok(Vec::new()),
        RespValue::Array(items) => items,
        RespValue::Error(e) => return Err(BrokerError::CommandRejected(e)),
        other => {
            return Err(BrokerError::Protocol(format!(
                "unexpected read reply: {other:?}"
            )))
        }
    };

    let mut out = Vec::new();
    for stream_pair in streams {
        let RespValue::Array(pair) = stream_pair else {
            return Err(BrokerError::Protocol("malformed stream block".to_string()));
        };
        let (Some(name_value), Some(RespValue::Array(entries))) = (pair.first(), pair.get(1))
        else {
            return Err(BrokerError::Protocol("malformed stream block".to_string()));
        };
        let Some(stream_name) = name_value.as_text() else {
            return Err(BrokerError::Protocol("unreadable stream name".to_string()));
        };

        for entry in entries {
            let RespValue::Array(entry_pair) = entry else {
                return Err(BrokerError::Protocol("malformed entry".to_string()));
            };
            let Some(id) = entry_pair.first().and_then(RespValue::as_text) else {
                return Err(BrokerError::Protocol("unreadable entry id".to_string()));
            };

            let mut fields = std::collections::HashMap::new();
            if let Some(RespValue::Array(kv)) = entry_pair.get(1) {
                for chunk in kv.chunks(2) {
                    if let (Some(key), Some(value)) = (
                        chunk.first().and_then(RespValue::as_text),
                        chunk.get(1).and_then(RespValue::as_text),
                    ) {
                        fields.insert(key, value);
                    }
                }
            }

            out.push(StreamEntry {
                stream: stream_name.clone(),
                id,
                fields,
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> RespValue {
        RespValue::Bulk(s.as_bytes().to_vec())
    }

    #[test]
    fn test_parse_read_reply_timeout() {
        assert!(parse_read_reply(RespValue::Null).unwrap().is_empty());
    }

    #[test]
    fn test_parse_read_reply_entries() {
        let reply = RespValue::Array(vec![RespValue::Array(vec![
            bulk("cdc.public.accounts"),
            RespValue::Array(vec![
                RespValue::Array(vec![
                    bulk("1-0"),
                    RespValue::Array(vec![bulk("value"), bulk(r#"{"op":"c"}"#)]),
                ]),
                RespValue::Array(vec![
                    bulk("1-1"),
                    RespValue::Array(vec![bulk("value"), bulk(r#"{"op":"u"}"#)]),
                ]),
            ]),
        ])]);

        let entries = parse_read_reply(reply).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].stream, "cdc.public.accounts");
        assert_eq!(entries[0].id, "1-0");
        assert_eq!(entries[0].fields["value"], r#"{"op":"c"}"#);
        assert_eq!(entries[1].id, "1-1");
    }

    #[test]
    fn test_parse_read_reply_rejects_malformed() {
        let reply = RespValue::Array(vec![RespValue::Integer(3)]);
        assert!(matches!(
            parse_read_reply(reply),
            Err(BrokerError::Protocol(_))
        ));
    }

    #[test]
    fn test_parse_read_reply_propagates_server_error() {
        let reply = RespValue::Error("NOGROUP no such group".to_string());
        assert!(matches!(
            parse_read_reply(reply),
            Err(BrokerError::CommandRejected(_))
        ));
    }
}
