use std::io::BufRead;

use crate::config::TableArgs;
use crate::error::CliError;

pub async fn run(config: &str, args: TableArgs) -> Result<(), CliError> {
    let config = config.to_string();
    tokio::task::spawn_blocking(move || {
        let table = super::open_table(&config, &args.table)?;
        let mut writer = table.writer()?;

        let mut rows = 0usize;
        for line in std::io::stdin().lock().lines() {
            let line = line?;
            writer.write_row(line.as_bytes())?;
            rows += 1;
        }
        writer.flush_chunk()?;

        tracing::info!(
            table = %args.table,
            stream = %writer.stream(),
            rows,
            entries = writer.appended(),
            "produce finished"
        );
        Ok::<_, CliError>(())
    })
    .await?
}
