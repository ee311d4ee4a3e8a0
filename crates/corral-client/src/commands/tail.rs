//! Tail command implementation

use anyhow::{Context, Result};
use corral_protocol::{Source, StreamKind};

use crate::output::print_warning;
use crate::Session;

/// Follow a console stream until interrupted or `limit` lines were printed
pub async fn tail_command(
    session: &Session,
    source: Source,
    id: u32,
    kind: StreamKind,
    limit: Option<usize>,
) -> Result<()> {
    let mut lines = session
        .executables()
        .subscribe(source, id, kind)
        .await
        .with_context(|| format!("Failed to follow {:?} {} {:?}", source, id, kind))?;

    let mut printed = 0usize;
    loop {
        if limit.is_some_and(|limit| printed >= limit) {
            break;
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next() => match line {
                Some(line) => {
                    println!("{}", line);
                    printed += 1;
                }
                None => {
                    print_warning("Connection closed");
                    break;
                }
            },
        }
    }

    lines.release().await;
    Ok(())
}
