use std::io::{self, Write};

use kset_core::{ApplyEvent, ApplyOperation, DryRunStrategy, Event, ObjMetadata};

/// One `applied Kind/name` line per applied object, marker first, then `Resources: N`.
#[derive(Debug, Default)]
pub struct SummaryPrinter {
    dry_run: DryRunStrategy,
    count: usize,
}

impl SummaryPrinter {
    pub fn new(dry_run: DryRunStrategy) -> Self { Self { dry_run, count: 0 } }

    fn applied(&mut self, out: &mut dyn Write, id: &ObjMetadata) -> io::Result<()> {
        self.count += 1;
        writeln!(out, "applied {}/{}{}", id.kind, id.name, self.dry_run.preview_suffix())
    }
}

impl crate::Printer for SummaryPrinter {
    fn event(&mut self, ev: &Event, out: &mut dyn Write) -> io::Result<()> {
        match ev {
            Event::Init(init) => self.applied(out, &init.inventory),
            Event::Apply(ApplyEvent::ResourceUpdate { object, operation, .. }) if *operation != ApplyOperation::Failed => self.applied(out, object),
            _ => Ok(()),
        }
    }

    fn finish(&mut self, out: &mut dyn Write) -> io::Result<()> { writeln!(out, "Resources: {}", self.count) }
}
