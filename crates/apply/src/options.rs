use std::time::Duration;

use kset_core::DryRunStrategy;
use kset_kubehub::Propagation;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

/// What to do with a live object that another inventory (or none) already tracks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InventoryPolicy {
    /// Only touch objects already owned by this inventory (or not yet existing).
    MustMatch,
    /// Also take over objects that carry no owner annotation.
    #[default]
    AdoptIfNoInventory,
    /// Take over objects regardless of their current owner.
    AdoptAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOptions {
    pub dry_run: DryRunStrategy,
    /// Prefer server-side apply; falls back to client-side merge when unsupported.
    pub server_side: bool,
    pub force_conflicts: bool,
    pub field_manager: String,
    /// Delete objects that left the desired set.
    pub prune: bool,
    pub propagation: Propagation,
    pub inventory_policy: InventoryPolicy,
    /// Wait for applied objects to become current; `None` skips the wait.
    pub reconcile_timeout: Option<Duration>,
    pub poll_interval: Duration,
    /// Capacity of the event queue; a slow consumer stalls the run beyond it.
    pub queue_cap: usize,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            dry_run: DryRunStrategy::None,
            server_side: false,
            force_conflicts: false,
            field_manager: "kset".to_string(),
            prune: true,
            propagation: Propagation::Background,
            inventory_policy: InventoryPolicy::default(),
            reconcile_timeout: None,
            poll_interval: Duration::from_secs(2),
            queue_cap: 64,
        }
    }
}

impl ApplyOptions {
    /// Defaults overlaid with `KSET_FIELD_MANAGER`, `KSET_QUEUE_CAP` and `KSET_POLL_INTERVAL_MS`.
    pub fn from_env() -> Self {
        let mut o = Self::default();
        if let Ok(fm) = std::env::var("KSET_FIELD_MANAGER") { if !fm.trim().is_empty() { o.field_manager = fm.trim().to_string(); } }
        if let Some(cap) = env_parse::<usize>("KSET_QUEUE_CAP") { o.queue_cap = cap.max(1); }
        if let Some(ms) = env_parse::<u64>("KSET_POLL_INTERVAL_MS") { o.poll_interval = Duration::from_millis(ms.max(1)); }
        o
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyOptions {
    pub dry_run: DryRunStrategy,
    pub propagation: Propagation,
    pub queue_cap: usize,
}

impl Default for DestroyOptions {
    fn default() -> Self { Self { dry_run: DryRunStrategy::None, propagation: Propagation::Background, queue_cap: 64 } }
}

impl DestroyOptions {
    pub fn from_env() -> Self {
        let mut o = Self::default();
        if let Some(cap) = env_parse::<usize>("KSET_QUEUE_CAP") { o.queue_cap = cap.max(1); }
        o
    }
}
