use std::path::Path;

use offsync_core::ActionType;

use crate::commands::common::{
    build_payload, open_database, parse_payload, record_action, PayloadFlags,
};
use crate::error::CliError;

pub async fn run_add(
    action_type: ActionType,
    flags: PayloadFlags,
    raw_payload: Option<&str>,
    user_key: &str,
    db_path: &Path,
) -> Result<(), CliError> {
    let payload = match raw_payload {
        Some(raw) => parse_payload(action_type, raw)?,
        None => build_payload(action_type, flags)?,
    };

    let db = open_database(db_path).await?;
    let action = record_action(&db, user_key, payload).await?;

    println!("{}", action.local_id);
    Ok(())
}
