pub mod block;
pub mod claim;
pub mod config;
pub mod cursor;
pub mod error;
pub mod reader;
pub mod settings;
pub mod streaming;
pub mod table;
pub mod writer;
