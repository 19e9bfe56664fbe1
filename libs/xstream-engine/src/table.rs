use std::sync::{Arc, Mutex};

use xstream_api::broker::{BrokerConnector, GroupCreation};
use xstream_api::message::Message;

use crate::block::{read_block, BlockLimits};
use crate::cursor::ConsumerIdentity;
use crate::error::EngineError;
use crate::reader::StreamReader;
use crate::settings::StreamsSettings;
use crate::writer::StreamWriter;

/// A stream-backed table: a pool of consumers sharing one group, plus the
/// means to build writers on the first stream.
pub struct StreamsTable {
    name: String,
    settings: StreamsSettings,
    streams: Vec<String>,
    connector: Arc<dyn BrokerConnector>,
    consumers: Mutex<Vec<StreamReader>>,
}

impl std::fmt::Debug for StreamsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamsTable")
            .field("name", &self.name)
            .field("streams", &self.streams)
            .finish()
    }
}

impl StreamsTable {
    /// Validate settings, create groups when managed, connect every consumer.
    pub fn open(
        name: impl Into<String>,
        settings: StreamsSettings,
        connector: Arc<dyn BrokerConnector>,
    ) -> Result<Self, EngineError> {
        let name = name.into();
        settings.validate()?;
        let streams = settings.streams();
        let group = settings.redis_group_name.clone();

        if settings.redis_manage_consumer_groups {
            let start = settings.group_start()?;
            let mut admin = connector.connect()?;
            for stream in &streams {
                match admin.create_group(stream, &group, &start)? {
                    GroupCreation::Created => {
                        tracing::info!(table = %name, %stream, %group, %start, "created consumer group")
                    }
                    GroupCreation::AlreadyExists => {
                        tracing::info!(table = %name, %stream, %group, "consumer group already exists")
                    }
                }
            }
        }

        let mut consumers = Vec::new();
        for consumer in settings.consumer_names() {
            let broker = connector
                .connect()
                .map_err(|e| e.with_context(format!("consumer '{consumer}'")))?;
            consumers.push(StreamReader::new(
                broker,
                ConsumerIdentity::new(group.clone(), consumer),
                &streams,
                settings.reader_options(),
            ));
        }

        tracing::info!(
            table = %name,
            streams = ?streams,
            %group,
            consumers = consumers.len(),
            "table opened"
        );

        Ok(Self {
            name,
            settings,
            streams,
            connector,
            consumers: Mutex::new(consumers),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &StreamsSettings {
        &self.settings
    }

    pub fn streams(&self) -> &[String] {
        &self.streams
    }

    pub fn block_limits(&self) -> BlockLimits {
        self.settings.block_limits()
    }

    /// Consumers currently parked in the pool.
    pub fn idle_consumers(&self) -> usize {
        self.pool().len()
    }

    /// Read one block with a pooled consumer.
    ///
    /// Acknowledges it when `redis_ack_on_select` is set; otherwise the
    /// entries stay pending and become reclaimable.
    pub fn select(&self) -> Result<Vec<Message>, EngineError> {
        let mut reader = self
            .pool()
            .pop()
            .ok_or_else(|| EngineError::Config(format!("table '{}': all consumers are busy", self.name)))?;

        let result = read_block(&mut reader, &self.block_limits(), false).and_then(|block| {
            if self.settings.redis_ack_on_select {
                reader.ack()?;
            }
            Ok(block)
        });

        self.pool().push(reader);
        result
    }

    /// Writer appending to the first stream of the list, on its own connection.
    pub fn writer(&self) -> Result<StreamWriter, EngineError> {
        let stream = self
            .streams
            .first()
            .ok_or_else(|| EngineError::Config(format!("table '{}' has no streams", self.name)))?;
        let broker = self.connector.connect()?;
        Ok(StreamWriter::new(broker, stream.clone(), self.settings.writer_options()?))
    }

    /// Move all pooled consumers out, e.g. into streaming tasks.
    pub fn take_consumers(&self) -> Vec<StreamReader> {
        std::mem::take(&mut *self.pool())
    }

    pub fn return_consumers(&self, readers: impl IntoIterator<Item = StreamReader>) {
        self.pool().extend(readers);
    }

    /// Destroy the consumer groups when they are managed by this table.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        if !self.settings.redis_manage_consumer_groups {
            return Ok(());
        }
        let group = &self.settings.redis_group_name;
        let mut admin = self.connector.connect()?;
        for stream in &self.streams {
            let removed = admin.destroy_group(stream, group)?;
            tracing::info!(table = %self.name, %stream, %group, removed, "destroyed consumer group");
        }
        Ok(())
    }

    fn pool(&self) -> std::sync::MutexGuard<'_, Vec<StreamReader>> {
        self.consumers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
