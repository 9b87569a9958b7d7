// Status table
// Text rendering of the supervisor's view of each service

use console::{style, StyledObject, Term};
use std::io;

use super::service::{Liveness, ServiceDescriptor};

const TITLE: &str = "Honeypot Lab Status";
const FOOTER: &str = "Press Ctrl+C to stop";

/// Status word shown for a descriptor
pub fn status_label(descriptor: &ServiceDescriptor) -> &'static str {
    if descriptor.enabled {
        descriptor.liveness.label()
    } else {
        "Disabled"
    }
}

fn styled_status(descriptor: &ServiceDescriptor) -> StyledObject<&'static str> {
    let label = status_label(descriptor);
    if !descriptor.enabled {
        return style(label).dim();
    }
    match descriptor.liveness {
        Liveness::Running => style(label).green().bold(),
        Liveness::NotStarted => style(label).yellow(),
        Liveness::Stopped | Liveness::Killed | Liveness::Crashed => style(label).red().bold(),
    }
}

/// Render the table; colours are dropped when stdout is not a terminal
pub fn render_table(services: &[ServiceDescriptor]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", style(TITLE).cyan().bold()));
    out.push_str(&format!(
        "{}\n",
        style(format!("{:<8} {:<8} {:<12} {:>8}", "Module", "Enabled", "Status", "PID"))
            .magenta()
            .bold()
    ));
    out.push_str(&format!("{}\n", "-".repeat(39)));

    for service in services {
        let enabled = if service.enabled {
            style("Yes").green()
        } else {
            style("No").red()
        };
        let pid = service
            .pid()
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<8} {:<8} {:<12} {:>8}\n",
            style(service.protocol.label()).dim(),
            enabled,
            styled_status(service),
            pid
        ));
    }

    out.push_str(&format!("{}\n", style(FOOTER).italic()));
    out
}

/// Writes the table to stdout, redrawing in place on a terminal
pub struct StatusDisplay {
    term: Term,
}

impl StatusDisplay {
    pub fn new() -> Self {
        Self {
            term: Term::stdout(),
        }
    }

    pub fn draw(&self, services: &[ServiceDescriptor]) -> io::Result<()> {
        if self.term.is_term() {
            self.term.clear_screen()?;
        }
        self.term.write_str(&render_table(services))?;
        self.term.flush()
    }
}

impl Default for StatusDisplay {
    fn default() -> Self {
        Self::new()
    }
}
