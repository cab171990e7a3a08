use std::path::Path;

use crate::commands::common::{
    action_to_item, format_pending_lines, list_pending, now_ms, open_database, PendingActionItem,
};
use crate::error::CliError;

pub async fn run_pending(as_json: bool, user_key: &str, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let actions = list_pending(&db, user_key).await?;
    let now = now_ms();

    if as_json {
        let json_items = actions
            .iter()
            .map(|action| action_to_item(action, now))
            .collect::<Vec<PendingActionItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if actions.is_empty() {
        println!("Nothing pending.");
        return Ok(());
    }

    for line in format_pending_lines(&actions, now) {
        println!("{line}");
    }
    Ok(())
}
