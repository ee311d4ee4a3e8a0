//! List command implementation

use anyhow::Result;
use corral_protocol::Source;

use crate::output::{format_resources, print_error};
use crate::Session;

/// Print every resource of one kind
pub async fn list_command(session: &Session, source: Source, json: bool) -> Result<()> {
    let resources = match session.resources().list(source).await {
        Ok(resources) => resources,
        Err(e) => {
            print_error(&format!("Failed to list resources: {}", e));
            return Err(e.into());
        }
    };

    if json {
        let rows: Vec<_> = resources
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.id,
                    "name": r.name,
                    "source": format!("{:?}", r.source),
                    "status": format!("{:?}", r.status),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        println!("{}", format_resources(&resources));
    }

    Ok(())
}
