use xstream_engine::settings::StreamsSettings;

use crate::error::CliError;

pub fn run() -> Result<(), CliError> {
    for decl in StreamsSettings::declarations() {
        let default = match (&decl.default, decl.required) {
            (_, true) => "required".to_string(),
            (Some(v), false) => v.to_string(),
            (None, false) => "-".to_string(),
        };
        println!(
            "{:<34} {:<13} {:<10} {}",
            decl.name, decl.setting_type.to_string(), default, decl.description
        );
    }
    Ok(())
}
