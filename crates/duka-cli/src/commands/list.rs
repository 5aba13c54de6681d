use duka_core::EntityKind;

use crate::commands::common::{
    format_record_lines, open_store, record_to_list_item, GlobalArgs, RecordListItem,
};
use crate::error::CliError;

pub async fn run_list(kind: EntityKind, as_json: bool, globals: &GlobalArgs) -> Result<(), CliError> {
    let store = open_store(&globals.db_path()?).await?;
    let records = store.list(kind).await?;

    if as_json {
        let json_items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Result<Vec<RecordListItem>, CliError>>()?;
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No {} recorded.", kind.collection());
        return Ok(());
    }
    for line in format_record_lines(&records) {
        println!("{line}");
    }
    Ok(())
}
