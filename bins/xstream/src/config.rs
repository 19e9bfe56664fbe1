use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "xstream", about = "Redis Streams table bridge")]
pub struct Cli {
    /// Path to TOML configuration file.
    #[arg(long, global = true, default_value = "xstream.toml", env = "XSTREAM_CONFIG")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stream blocks of a table to stdout as JSON lines until Ctrl+C.
    Consume(TableArgs),
    /// Read one block of a table and print it.
    Select(TableArgs),
    /// Append stdin lines to a table's first stream, one line per row.
    Produce(TableArgs),
    /// List every table setting with its type and default.
    Settings,
}

#[derive(Args, Clone, Debug)]
pub struct TableArgs {
    /// Table name from `[[tables]]`.
    #[arg(long)]
    pub table: String,
}
