use std::collections::BTreeMap;

use kset_core::{ApplyOperation, DeleteOperation, ObjMetadata, PruneOperation, ResourceStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub serverside_applied: usize,
    pub created: usize,
    pub unchanged: usize,
    pub configured: usize,
    pub failed: usize,
}

impl ApplyStats {
    pub fn inc(&mut self, op: ApplyOperation) {
        match op {
            ApplyOperation::ServersideApplied => self.serverside_applied += 1,
            ApplyOperation::Created => self.created += 1,
            ApplyOperation::Unchanged => self.unchanged += 1,
            ApplyOperation::Configured => self.configured += 1,
            ApplyOperation::Failed => self.failed += 1,
        }
    }

    /// Successful applies; failures are reported separately.
    pub fn sum(&self) -> usize { self.serverside_applied + self.created + self.unchanged + self.configured }

    pub fn summary(&self) -> String {
        let mut out = format!("{} resource(s) applied. {} created, {} unchanged, {} configured", self.sum(), self.created, self.unchanged, self.configured);
        if self.serverside_applied > 0 { out.push_str(&format!(", {} serverside applied", self.serverside_applied)); }
        if self.failed > 0 { out.push_str(&format!(", {} failed", self.failed)); }
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub pruned: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl PruneStats {
    pub fn inc(&mut self, op: PruneOperation) {
        match op {
            PruneOperation::Pruned => self.pruned += 1,
            PruneOperation::PruneSkipped => self.skipped += 1,
            PruneOperation::PruneFailed => self.failed += 1,
        }
    }

    pub fn summary(&self) -> String {
        let mut out = format!("{} resource(s) pruned, {} skipped", self.pruned, self.skipped);
        if self.failed > 0 { out.push_str(&format!(", {} failed", self.failed)); }
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteStats {
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl DeleteStats {
    pub fn inc(&mut self, op: DeleteOperation) {
        match op {
            DeleteOperation::Deleted => self.deleted += 1,
            DeleteOperation::DeleteSkipped => self.skipped += 1,
            DeleteOperation::DeleteFailed => self.failed += 1,
        }
    }

    pub fn summary(&self) -> String {
        let mut out = format!("{} resource(s) deleted, {} skipped", self.deleted, self.skipped);
        if self.failed > 0 { out.push_str(&format!(", {} failed", self.failed)); }
        out
    }
}

/// Latest status per object. Updates arriving before the apply phase
/// completes are held back and printed with its summary.
#[derive(Debug, Default)]
pub struct StatusCollector {
    pub latest: BTreeMap<ObjMetadata, (ResourceStatus, String)>,
    pub print_status: bool,
}

impl StatusCollector {
    pub fn update(&mut self, id: ObjMetadata, status: ResourceStatus, message: String) { self.latest.insert(id, (status, message)); }
}
