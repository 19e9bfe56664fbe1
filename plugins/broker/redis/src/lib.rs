mod reply;

use redis::{Client, Connection, ConnectionInfo, IntoConnectionInfo, RedisError, Value};

use xstream_api::broker::{
    BrokerConnector, GroupCreation, GroupStart, PendingRecord, ReadGroupRequest, StreamBroker,
};
use xstream_api::entry::{Entry, EntryId, Fields, StreamEntries};
use xstream_api::error::BrokerError;

// ═══════════════════════════════════════════════════════════════
//  Errors
// ═══════════════════════════════════════════════════════════════

/// Map a client error onto the broker error taxonomy.
fn map_err(e: RedisError, stream: &str, group: &str) -> BrokerError {
    if e.code() == Some("NOGROUP") {
        return BrokerError::no_group(stream, group);
    }
    if is_transport(&e) {
        BrokerError::transport(e.to_string())
    } else {
        BrokerError::protocol(e.to_string())
    }
}

fn is_transport(e: &RedisError) -> bool {
    e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal()
}

// ═══════════════════════════════════════════════════════════════
//  Connector
// ═══════════════════════════════════════════════════════════════

/// Opens one synchronous Redis connection per engine instance.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    info: ConnectionInfo,
}

impl RedisConnector {
    /// `address` is `host:port` or a `redis://` / `rediss://` URL.
    /// A non-empty `password` overrides one embedded in the URL.
    pub fn new(address: &str, password: &str) -> Result<Self, BrokerError> {
        let url = if address.contains("://") {
            address.to_string()
        } else {
            format!("redis://{address}")
        };
        let mut info = url
            .as_str()
            .into_connection_info()
            .map_err(|e| BrokerError::config(format!("invalid broker address '{address}': {e}")))?;
        if !password.is_empty() {
            info.redis.password = Some(password.to_string());
        }
        Ok(Self { info })
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }
}

impl BrokerConnector for RedisConnector {
    fn connect(&self) -> Result<Box<dyn StreamBroker>, BrokerError> {
        let client = Client::open(self.info.clone())
            .map_err(|e| BrokerError::config(format!("redis client: {e}")))?;
        Ok(Box::new(RedisBroker::new(client)))
    }
}

// ═══════════════════════════════════════════════════════════════
//  RedisBroker
// ═══════════════════════════════════════════════════════════════

/// Redis Streams over one synchronous connection.
///
/// The connection is opened on first use and dropped after a transport
/// error; the next command reconnects. Commands are never retried.
pub struct RedisBroker {
    client: Client,
    conn: Option<Connection>,
}

impl RedisBroker {
    pub fn new(client: Client) -> Self {
        Self { client, conn: None }
    }

    fn query(&mut self, cmd: &redis::Cmd, stream: &str, group: &str) -> Result<Value, BrokerError> {
        if self.conn.is_none() {
            let conn = self
                .client
                .get_connection()
                .map_err(|e| BrokerError::transport(format!("connect: {e}")))?;
            tracing::debug!(addr = %self.client.get_connection_info().addr, "redis connected");
            self.conn = Some(conn);
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(BrokerError::transport("no connection"));
        };

        cmd.query::<Value>(conn).map_err(|e| {
            if is_transport(&e) {
                tracing::warn!(error = %e, "redis connection lost");
                self.conn = None;
            }
            map_err(e, stream, group)
        })
    }
}

impl StreamBroker for RedisBroker {
    fn create_group(
        &mut self,
        stream: &str,
        group: &str,
        start: &GroupStart,
    ) -> Result<GroupCreation, BrokerError> {
        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("CREATE").arg(stream).arg(group).arg(start.to_string()).arg("MKSTREAM");
        match self.query(&cmd, stream, group) {
            Ok(_) => Ok(GroupCreation::Created),
            Err(e) if e.message.contains("BUSYGROUP") => Ok(GroupCreation::AlreadyExists),
            Err(e) => Err(e),
        }
    }

    fn destroy_group(&mut self, stream: &str, group: &str) -> Result<bool, BrokerError> {
        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("DESTROY").arg(stream).arg(group);
        let value = self.query(&cmd, stream, group)?;
        Ok(reply::int(&value, "XGROUP DESTROY")? > 0)
    }

    fn read_group(&mut self, request: &ReadGroupRequest<'_>) -> Result<Vec<StreamEntries>, BrokerError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(request.group).arg(request.consumer);
        if let Some(count) = request.count {
            cmd.arg("COUNT").arg(count);
        }
        if let Some(block) = request.block {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS");
        for (stream, _) in request.streams {
            cmd.arg(stream);
        }
        for (_, position) in request.streams {
            cmd.arg(position.to_string());
        }

        let first = request.streams.first().map_or("", |(s, _)| s.as_str());
        let value = self.query(&cmd, first, request.group)?;
        reply::read_group(&value)
    }

    fn list_pending(
        &mut self,
        stream: &str,
        group: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<PendingRecord>, BrokerError> {
        let mut cmd = redis::cmd("XPENDING");
        cmd.arg(stream)
            .arg(group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count);
        let value = self.query(&cmd, stream, group)?;
        reply::pending(stream, &value)
    }

    fn claim(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        ids: &[EntryId],
    ) -> Result<Vec<Entry>, BrokerError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(stream).arg(group).arg(consumer).arg(min_idle_ms);
        for id in ids {
            cmd.arg(id.to_string());
        }
        let value = self.query(&cmd, stream, group)?;
        reply::entries(&value)
    }

    fn ack(&mut self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64, BrokerError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("XACK");
        cmd.arg(stream).arg(group);
        for id in ids {
            cmd.arg(id.to_string());
        }
        let value = self.query(&cmd, stream, group)?;
        reply::int(&value, "XACK")
    }

    fn append(&mut self, stream: &str, fields: &Fields) -> Result<EntryId, BrokerError> {
        if fields.is_empty() {
            return Err(BrokerError::format("entry must have at least one field"));
        }
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (name, value) in fields.iter() {
            cmd.arg(name).arg(value);
        }
        let value = self.query(&cmd, stream, "")?;
        reply::entry_id(&value)
    }
}
