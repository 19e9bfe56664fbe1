use crate::config::TableArgs;
use crate::error::CliError;

pub async fn run(config: &str, args: TableArgs) -> Result<(), CliError> {
    let config = config.to_string();
    let messages = tokio::task::spawn_blocking(move || {
        let table = super::open_table(&config, &args.table)?;
        Ok::<_, CliError>(table.select()?)
    })
    .await??;

    super::write_json_lines(&mut std::io::stdout().lock(), &messages)?;
    tracing::info!(rows = messages.len(), "select finished");
    Ok(())
}
