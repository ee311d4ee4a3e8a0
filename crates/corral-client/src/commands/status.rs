//! Status command implementation

use anyhow::Result;

use crate::output::{format_status, print_warning};
use crate::Session;

/// Print the session summary and the controller's extension modules
pub async fn status_command(session: &Session, json: bool) -> Result<()> {
    let modules = match session.extensions().modules().await {
        Ok(modules) => Some(modules),
        Err(e) => {
            print_warning(&format!("Could not list extension modules: {}", e));
            None
        }
    };

    if json {
        let value = serde_json::json!({
            "server": session.server_name(),
            "user": session.user(),
            "state": session.state().to_string(),
            "modules": modules.as_ref().map(|modules| {
                modules
                    .iter()
                    .map(|m| serde_json::json!({ "id": m.id, "name": m.name }))
                    .collect::<Vec<_>>()
            }),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        let user = session.user();
        println!(
            "{}",
            format_status(
                session.server_name(),
                user.as_deref(),
                session.state(),
                modules.as_deref(),
            )
        );
    }

    Ok(())
}
