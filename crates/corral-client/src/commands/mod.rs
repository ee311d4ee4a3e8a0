//! Diagnostic commands run by the `corral` binary

mod list;
mod status;
mod tail;

pub use list::list_command;
pub use status::status_command;
pub use tail::tail_command;

use clap::ValueEnum;
use corral_protocol::{Source, StreamKind};

/// Resource kind as given on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    Server,
    Service,
}

impl From<SourceArg> for Source {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Server => Source::Server,
            SourceArg::Service => Source::Service,
        }
    }
}

/// Console stream as given on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StreamArg {
    Input,
    Output,
    Errors,
}

impl From<StreamArg> for StreamKind {
    fn from(arg: StreamArg) -> Self {
        match arg {
            StreamArg::Input => StreamKind::Input,
            StreamArg::Output => StreamKind::Output,
            StreamArg::Errors => StreamKind::Errors,
        }
    }
}
