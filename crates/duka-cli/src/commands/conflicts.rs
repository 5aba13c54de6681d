use crate::commands::common::{format_conflict_lines, open_store, GlobalArgs};
use crate::error::CliError;

pub async fn run_conflicts(as_json: bool, globals: &GlobalArgs) -> Result<(), CliError> {
    let store = open_store(&globals.db_path()?).await?;
    let conflicts = store.conflicts().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts outstanding.");
        return Ok(());
    }
    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
