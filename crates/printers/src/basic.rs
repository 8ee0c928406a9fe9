use std::io::{self, Write};

use kset_core::{ApplyEvent, DeleteEvent, DeleteOperation, DryRunStrategy, Event, ObjMetadata, PruneEvent, PruneOperation, StatusEvent};

use crate::{ApplyStats, DeleteStats, Printer, PruneStats, StatusCollector};

/// `configmap/name created` style lines plus a summary after each phase.
#[derive(Debug, Default)]
pub struct BasicPrinter {
    dry_run: DryRunStrategy,
    apply: ApplyStats,
    prune: PruneStats,
    delete: DeleteStats,
    status: StatusCollector,
}

fn resource(id: &ObjMetadata) -> String { format!("{}/{}", id.group_kind().to_lowercase(), id.name) }

fn with_error(line: String, error: &Option<String>) -> String {
    match error {
        Some(e) => format!("{}: {}", line, e),
        None => line,
    }
}

impl BasicPrinter {
    pub fn new(dry_run: DryRunStrategy) -> Self { Self { dry_run, ..Default::default() } }

    pub fn apply_stats(&self) -> ApplyStats { self.apply }
    pub fn prune_stats(&self) -> PruneStats { self.prune }
    pub fn delete_stats(&self) -> DeleteStats { self.delete }

    fn line(&self, out: &mut dyn Write, text: &str) -> io::Result<()> { writeln!(out, "{}{}", text, self.dry_run.preview_suffix()) }

    fn status_line(&self, out: &mut dyn Write, id: &ObjMetadata) -> io::Result<()> {
        match self.status.latest.get(id) {
            Some((status, message)) => self.line(out, &format!("{} is {}: {}", resource(id), status, message)),
            None => Ok(()),
        }
    }
}

impl Printer for BasicPrinter {
    fn event(&mut self, ev: &Event, out: &mut dyn Write) -> io::Result<()> {
        match ev {
            Event::Init(_) | Event::Error(_) => Ok(()),
            Event::Apply(ApplyEvent::ResourceUpdate { object, operation, error }) => {
                self.apply.inc(*operation);
                self.line(out, &with_error(format!("{} {}", resource(object), operation.as_str().to_lowercase()), error))
            }
            Event::Apply(ApplyEvent::Completed) => {
                self.line(out, &self.apply.summary())?;
                self.status.print_status = true;
                let ids: Vec<ObjMetadata> = self.status.latest.keys().cloned().collect();
                for id in &ids { self.status_line(out, id)?; }
                Ok(())
            }
            Event::Status(StatusEvent::ResourceUpdate { object, status, message }) => {
                self.status.update(object.clone(), *status, message.clone());
                if self.status.print_status { self.status_line(out, object) } else { Ok(()) }
            }
            Event::Status(StatusEvent::Error { object, message }) => self.line(out, &format!("{} error: {}", resource(object), message)),
            Event::Status(StatusEvent::Completed) => {
                self.status.print_status = false;
                self.line(out, "all resources have reached the Current status")
            }
            Event::Status(StatusEvent::Aborted) => {
                self.status.print_status = false;
                self.line(out, "resources failed to reach the Current status")
            }
            Event::Prune(PruneEvent::ResourceUpdate { object, operation, error }) => {
                self.prune.inc(*operation);
                let verb = match operation {
                    PruneOperation::Pruned => "pruned",
                    PruneOperation::PruneSkipped => "prune skipped",
                    PruneOperation::PruneFailed => "prune failed",
                };
                self.line(out, &with_error(format!("{} {}", resource(object), verb), error))
            }
            Event::Prune(PruneEvent::Completed) => self.line(out, &self.prune.summary()),
            Event::Delete(DeleteEvent::ResourceUpdate { object, operation, error }) => {
                self.delete.inc(*operation);
                let verb = match operation {
                    DeleteOperation::Deleted => "deleted",
                    DeleteOperation::DeleteSkipped => "delete skipped",
                    DeleteOperation::DeleteFailed => "delete failed",
                };
                self.line(out, &with_error(format!("{} {}", resource(object), verb), error))
            }
            Event::Delete(DeleteEvent::Completed) => self.line(out, &self.delete.summary()),
        }
    }
}
