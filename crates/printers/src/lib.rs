//! kset printers: consumers that turn a run's event stream into output.
//!
//! Three renderings share one driver, [`print`]: human lines with per-phase
//! summaries ([`BasicPrinter`]), the terse `applied Kind/name` listing
//! ([`SummaryPrinter`]) and one JSON document per event ([`JsonPrinter`]).

#![forbid(unsafe_code)]

use std::io::{self, Write};
use std::str::FromStr;

use futures::{Stream, StreamExt};
use kset_core::{DryRunStrategy, Event, RunError};

mod basic;
mod json;
mod stats;
mod summary;

pub use basic::BasicPrinter;
pub use json::JsonPrinter;
pub use stats::{ApplyStats, DeleteStats, PruneStats, StatusCollector};
pub use summary::SummaryPrinter;

#[derive(Debug, thiserror::Error)]
pub enum PrintError {
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Run(#[from] RunError),
}

/// Renders events one at a time.
pub trait Printer {
    fn event(&mut self, ev: &Event, out: &mut dyn Write) -> io::Result<()>;

    /// Called once after the stream closed without an error.
    fn finish(&mut self, _out: &mut dyn Write) -> io::Result<()> { Ok(()) }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PrinterKind {
    #[default]
    Events,
    Summary,
    Json,
}

impl FromStr for PrinterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "events" => Ok(PrinterKind::Events),
            "summary" => Ok(PrinterKind::Summary),
            "json" => Ok(PrinterKind::Json),
            other => Err(format!("unknown printer {:?} (expected events, summary or json)", other)),
        }
    }
}

pub fn printer(kind: PrinterKind, dry_run: DryRunStrategy) -> Box<dyn Printer + Send> {
    match kind {
        PrinterKind::Events => Box::new(BasicPrinter::new(dry_run)),
        PrinterKind::Summary => Box::new(SummaryPrinter::new(dry_run)),
        PrinterKind::Json => Box::new(JsonPrinter::default()),
    }
}

/// Drain `events` through `printer` until the producer closes the stream.
/// An `Error` event is rendered and then returned as [`PrintError::Run`].
pub async fn print<S>(printer: &mut dyn Printer, mut events: S, out: &mut dyn Write) -> Result<(), PrintError>
where
    S: Stream<Item = Event> + Unpin,
{
    while let Some(ev) = events.next().await {
        printer.event(&ev, out)?;
        if let Event::Error(e) = ev {
            out.flush()?;
            return Err(PrintError::Run(e.error));
        }
    }
    printer.finish(out)?;
    out.flush()?;
    Ok(())
}
