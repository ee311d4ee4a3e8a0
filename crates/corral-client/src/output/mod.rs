//! Output formatting utilities for the CLI

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use tabled::{settings::Style, Table, Tabled};

use corral_core::SessionState;
use corral_protocol::{ModuleInfo, ResourceInfo};

/// Format resources as an ASCII table
pub fn format_resources(resources: &[ResourceInfo]) -> String {
    if resources.is_empty() {
        return "No resources".to_string();
    }

    #[derive(Tabled)]
    struct ResourceRow {
        #[tabled(rename = "ID")]
        id: u32,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "KIND")]
        kind: String,
        #[tabled(rename = "STATUS")]
        status: String,
    }

    let rows: Vec<ResourceRow> = resources
        .iter()
        .map(|r| ResourceRow {
            id: r.id,
            name: r.name.clone(),
            kind: format!("{:?}", r.source),
            status: format!("{:?}", r.status),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format the session summary shown by `corral status`
///
/// `modules` is None when the controller refused to enumerate them.
pub fn format_status(
    server: &str,
    user: Option<&str>,
    state: SessionState,
    modules: Option<&[ModuleInfo]>,
) -> String {
    let mut lines = vec![
        format!("Controller: {}", server),
        format!("User:       {}", user.unwrap_or("-")),
        format!("State:      {}", state),
    ];

    match modules {
        Some([]) => lines.push("Modules:    none".to_string()),
        Some(modules) => {
            let names: Vec<String> = modules
                .iter()
                .map(|m| format!("{} (#{})", m.name, m.id))
                .collect();
            lines.push(format!("Modules:    {}", names.join(", ")));
        }
        None => lines.push("Modules:    unavailable".to_string()),
    }

    lines.join("\n")
}

fn print_marked(out: &mut impl std::io::Write, color: Color, mark: &str, msg: &str) {
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(mark),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a success message to stdout
pub fn print_success(msg: &str) {
    print_marked(&mut std::io::stdout(), Color::Green, "✓ ", msg);
}

/// Print an error message to stderr
pub fn print_error(msg: &str) {
    print_marked(&mut std::io::stderr(), Color::Red, "✗ ", msg);
}

/// Print a warning to stderr
pub fn print_warning(msg: &str) {
    print_marked(&mut std::io::stderr(), Color::Yellow, "⚠ ", msg);
}
