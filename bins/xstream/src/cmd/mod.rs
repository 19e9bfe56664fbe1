pub mod consume;
pub mod produce;
pub mod select;
pub mod settings;

use std::io::Write;
use std::sync::Arc;

use xstream_api::message::Message;
use xstream_broker_redis::RedisConnector;
use xstream_engine::config::BridgeConfig;
use xstream_engine::table::StreamsTable;

use crate::error::CliError;

/// Load the config and open `table` against Redis. Blocking.
fn open_table(config_path: &str, table: &str) -> Result<StreamsTable, CliError> {
    let config = BridgeConfig::load(config_path)?;
    tracing::info!(config = %config_path, tables = config.tables.len(), "loaded config");

    let settings = config.table(table)?.settings()?;
    let connector = RedisConnector::new(&settings.redis_broker, &settings.redis_password)?;
    Ok(StreamsTable::open(table, settings, Arc::new(connector))?)
}

/// One JSON object per message, one per line.
fn write_json_lines(out: &mut impl Write, messages: &[Message]) -> Result<(), CliError> {
    for message in messages {
        serde_json::to_writer(&mut *out, message)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}
