use crate::commands::common::{connect, format_sync_result_lines, GlobalArgs};
use crate::error::CliError;

pub async fn run_sync(as_json: bool, globals: &GlobalArgs) -> Result<(), CliError> {
    let (client, _) = connect(globals).await?;
    let result = client.coordinator().sync_now().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for line in format_sync_result_lines(&result) {
            println!("{line}");
        }
    }
    Ok(())
}
