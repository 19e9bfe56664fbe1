use std::time::Duration;

use xstream_api::broker::GroupStart;
use xstream_api::settings::{SettingDecl, SettingType, SettingValue, SettingValues};
use xstream_api::Settings;

use crate::block::{AckMode, BlockLimits, DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_BLOCK_ROWS};
use crate::claim::ClaimOptions;
use crate::error::EngineError;
use crate::reader::ReaderOptions;
use crate::writer::WriterOptions;

/// Storage name used in setting errors.
pub const STORAGE_NAME: &str = "RedisStreams";

/// Settings of one stream-backed table.
#[derive(Settings, Debug, Clone, PartialEq)]
pub struct StreamsSettings {
    #[setting(required, description = "Broker address: host:port or redis:// URL")]
    pub redis_broker: String,

    #[setting(required, description = "Comma-separated list of streams, read in this order")]
    pub redis_stream_list: String,

    #[setting(required, description = "Consumer group name")]
    pub redis_group_name: String,

    #[setting(description = "Consumer name; suffixed with -N when several consumers are configured")]
    pub redis_common_consumer_id: String,

    #[setting(description = "Number of consumers (each with its own connection)")]
    pub redis_num_consumers: u64,

    #[setting(description = "Create consumer groups on startup and destroy them on shutdown")]
    pub redis_manage_consumer_groups: bool,

    #[setting(description = "Start id for created consumer groups ($, 0 or an entry id)")]
    pub redis_consumer_groups_start_id: String,

    #[setting(description = "Acknowledge after every consumed batch instead of after the block is written")]
    pub redis_ack_every_batch: bool,

    #[setting(description = "Acknowledge entries read by a direct select")]
    pub redis_ack_on_select: bool,

    #[setting(description = "Read-group block time in milliseconds (0 blocks until data arrives)")]
    pub redis_poll_timeout_ms: Duration,

    #[setting(description = "Max entries per stream in one read-group call (0 is unbounded)")]
    pub redis_poll_max_batch_size: u64,

    #[setting(description = "Max pending entries reclaimed per stream per poll (0 disables reclaiming)")]
    pub redis_claim_max_batch_size: u64,

    #[setting(description = "Idle time in milliseconds before a pending entry may be reclaimed")]
    pub redis_min_time_for_claim: Duration,

    #[setting(description = "Minimum milliseconds between reclaim attempts on one stream")]
    pub redis_claim_check_interval_ms: Duration,

    #[setting(description = "Re-read this consumer's own pending entries before new ones")]
    pub redis_recover_pending: bool,

    #[setting(description = "Max rows in one block (0 means 65536)")]
    pub redis_max_block_size: u64,

    #[setting(description = "Max milliseconds spent collecting one block (0 means 7500)")]
    pub redis_flush_interval_ms: Duration,

    #[setting(description = "Run one streaming task per consumer")]
    pub redis_thread_per_consumer: bool,

    #[setting(description = "Broker password")]
    pub redis_password: String,

    #[setting(description = "Rows packed into one appended entry")]
    pub redis_rows_per_message: u64,

    #[setting(description = "Bytes after which an outgoing entry is sealed (0 is no limit)")]
    pub redis_max_message_bytes: u64,

    #[setting(description = "Single-character field/value delimiter; empty sends one 'data' field")]
    pub redis_field_delimiter: String,
}

impl Default for StreamsSettings {
    fn default() -> Self {
        Self {
            redis_broker: String::new(),
            redis_stream_list: String::new(),
            redis_group_name: String::new(),
            redis_common_consumer_id: String::new(),
            redis_num_consumers: 1,
            redis_manage_consumer_groups: false,
            redis_consumer_groups_start_id: "$".into(),
            redis_ack_every_batch: false,
            redis_ack_on_select: true,
            redis_poll_timeout_ms: Duration::ZERO,
            redis_poll_max_batch_size: 0,
            redis_claim_max_batch_size: 0,
            redis_min_time_for_claim: Duration::from_millis(10_000),
            redis_claim_check_interval_ms: Duration::ZERO,
            redis_recover_pending: false,
            redis_max_block_size: 0,
            redis_flush_interval_ms: Duration::ZERO,
            redis_thread_per_consumer: false,
            redis_password: String::new(),
            redis_rows_per_message: 1,
            redis_max_message_bytes: 0,
            redis_field_delimiter: String::new(),
        }
    }
}

impl StreamsSettings {
    /// Build validated settings from a table's `[settings]` section.
    pub fn from_toml(table: &toml::Table) -> Result<Self, EngineError> {
        let values = collect_values(table, &Self::declarations())?;
        let settings = Self::from_values(&values).map_err(|e| EngineError::Config(e.message))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.streams().is_empty() {
            return Err(EngineError::Config(
                "redis_stream_list must name at least one stream".into(),
            ));
        }
        if self.redis_group_name.trim().is_empty() {
            return Err(EngineError::Config("redis_group_name must not be empty".into()));
        }
        if self.redis_num_consumers == 0 {
            return Err(EngineError::Config("redis_num_consumers must be at least 1".into()));
        }
        if self.redis_rows_per_message == 0 {
            return Err(EngineError::Config(
                "redis_rows_per_message must be at least 1".into(),
            ));
        }
        self.group_start()?;
        self.field_delimiter()?;
        Ok(())
    }

    /// Streams in subscription order, blanks dropped.
    pub fn streams(&self) -> Vec<String> {
        self.redis_stream_list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn group_start(&self) -> Result<GroupStart, EngineError> {
        GroupStart::parse(&self.redis_consumer_groups_start_id)
            .map_err(|e| EngineError::Config(format!("redis_consumer_groups_start_id: {}", e.message)))
    }

    /// One consumer name per configured consumer, unique within the group.
    pub fn consumer_names(&self) -> Vec<String> {
        let base = if self.redis_common_consumer_id.is_empty() {
            format!("{}-{}", self.redis_group_name, std::process::id())
        } else {
            self.redis_common_consumer_id.clone()
        };
        match self.redis_num_consumers {
            0 | 1 => vec![base],
            n => (0..n).map(|i| format!("{base}-{i}")).collect(),
        }
    }

    pub fn field_delimiter(&self) -> Result<Option<u8>, EngineError> {
        match self.redis_field_delimiter.as_bytes() {
            [] => Ok(None),
            [b] if b.is_ascii() => Ok(Some(*b)),
            _ => Err(EngineError::Config(format!(
                "redis_field_delimiter must be a single ASCII character, got '{}'",
                self.redis_field_delimiter
            ))),
        }
    }

    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            poll_batch_size: self.redis_poll_max_batch_size as usize,
            poll_timeout: self.redis_poll_timeout_ms,
            claim: ClaimOptions {
                batch_size: self.redis_claim_max_batch_size as usize,
                min_idle: self.redis_min_time_for_claim,
                check_interval: self.redis_claim_check_interval_ms,
            },
            recover_pending: self.redis_recover_pending,
        }
    }

    pub fn writer_options(&self) -> Result<WriterOptions, EngineError> {
        Ok(WriterOptions {
            rows_per_message: self.redis_rows_per_message as usize,
            max_message_bytes: self.redis_max_message_bytes as usize,
            delimiter: self.field_delimiter()?,
        })
    }

    pub fn block_limits(&self) -> BlockLimits {
        BlockLimits {
            max_rows: match self.redis_max_block_size {
                0 => DEFAULT_MAX_BLOCK_ROWS,
                n => n as usize,
            },
            flush_interval: if self.redis_flush_interval_ms.is_zero() {
                DEFAULT_FLUSH_INTERVAL
            } else {
                self.redis_flush_interval_ms
            },
        }
    }

    pub fn ack_mode(&self) -> AckMode {
        if self.redis_ack_every_batch {
            AckMode::EveryBatch
        } else {
            AckMode::AfterWrite
        }
    }
}

// ---------------------------------------------------------------------------
// Raw values → typed SettingValues
// ---------------------------------------------------------------------------

/// Convert a TOML `[settings]` table into typed values.
///
/// Rejects keys that are not declared. Only keys present in `table` are
/// returned; defaults are applied by `from_values`.
pub fn collect_values(
    table: &toml::Table,
    decls: &[SettingDecl],
) -> Result<SettingValues, EngineError> {
    for key in table.keys() {
        if !decls.iter().any(|d| d.name == *key) {
            return Err(EngineError::Config(format!(
                "unknown setting '{key}' for storage {STORAGE_NAME}"
            )));
        }
    }

    let mut values = SettingValues::new();
    for decl in decls {
        if let Some(raw) = table.get(&decl.name) {
            values.set(decl.name.clone(), toml_to_value(raw, decl)?);
        }
    }
    Ok(values)
}

fn toml_to_value(val: &toml::Value, decl: &SettingDecl) -> Result<SettingValue, EngineError> {
    let mismatch = || {
        EngineError::Config(format!(
            "setting '{}': expected {}, got {}",
            decl.name,
            decl.setting_type,
            val.type_str()
        ))
    };
    match decl.setting_type {
        SettingType::Bool => val.as_bool().map(SettingValue::Bool).ok_or_else(mismatch),
        SettingType::U64 | SettingType::Milliseconds => {
            let i = val.as_integer().ok_or_else(mismatch)?;
            u64::try_from(i).map(SettingValue::U64).map_err(|_| {
                EngineError::Config(format!(
                    "setting '{}': expected non-negative integer, got {i}",
                    decl.name
                ))
            })
        }
        SettingType::Str => match val {
            toml::Value::String(s) => Ok(SettingValue::Str(s.clone())),
            toml::Value::Integer(i) => Ok(SettingValue::Str(i.to_string())),
            // `redis_stream_list = ["a", "b"]` is accepted as "a,b".
            toml::Value::Array(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string).ok_or_else(mismatch))
                .collect::<Result<Vec<_>, _>>()
                .map(|parts| SettingValue::Str(parts.join(","))),
            _ => Err(mismatch()),
        },
    }
}
