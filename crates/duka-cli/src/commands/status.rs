use duka_core::SyncStatus;

use crate::commands::common::{format_status_lines, open_session, GlobalArgs, Session};
use crate::error::CliError;

pub async fn run_status(as_json: bool, globals: &GlobalArgs) -> Result<(), CliError> {
    let status = match open_session(globals).await? {
        Session::Connected(client) => client.coordinator().status().await,
        Session::Local(store) => SyncStatus {
            pending_count: store.pending_count(),
            conflicts: store.conflicts().await?,
            ..SyncStatus::default()
        },
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        for line in format_status_lines(&status) {
            println!("{line}");
        }
    }
    Ok(())
}
