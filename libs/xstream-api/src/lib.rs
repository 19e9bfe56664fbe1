pub mod broker;
pub mod entry;
pub mod error;
pub mod message;
pub mod settings;

pub use xstream_api_derive::Settings;
