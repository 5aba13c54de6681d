use duka_core::models::OperationId;

use crate::cli::QueueCommands;
use crate::commands::common::{format_operation_lines, open_store, GlobalArgs};
use crate::error::CliError;

pub async fn run_queue(command: QueueCommands, globals: &GlobalArgs) -> Result<(), CliError> {
    let store = open_store(&globals.db_path()?).await?;
    match command {
        QueueCommands::List { json } => {
            let operations = store.operations().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&operations)?);
            } else if operations.is_empty() {
                println!("Queue is empty.");
            } else {
                for line in format_operation_lines(&operations) {
                    println!("{line}");
                }
            }
        }
        QueueCommands::Retry { op_id } => {
            store
                .retry_operation(OperationId::new(op_id))
                .await
                .map_err(|error| match error {
                    duka_core::Error::NotFound(_) => CliError::OperationNotFound(op_id),
                    other => CliError::Core(other),
                })?;
            println!("Operation {op_id} will be retried on the next sync");
        }
        QueueCommands::Purge { op_id } => {
            if !store.discard_operation(OperationId::new(op_id)).await? {
                return Err(CliError::OperationNotFound(op_id));
            }
            println!("Operation {op_id} discarded");
        }
    }
    Ok(())
}
