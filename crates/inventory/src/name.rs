use std::time::{SystemTime, UNIX_EPOCH};

use kube::core::DynamicObject;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::debug;

use crate::InventoryError;

/// Default marker name shipped in older templates; collides across sets sharing a namespace.
pub const LEGACY_INVENTORY_NAME: &str = "inventory";

const SUFFIX_LEN: usize = 8;
const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Suffix source used when the caller does not inject one.
pub fn time_seeded_rng() -> StdRng {
    let seed = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or_default();
    StdRng::seed_from_u64(seed)
}

pub fn random_suffix<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..SUFFIX_LEN).map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char).collect()
}

pub fn is_legacy_name(obj: &DynamicObject) -> bool { obj.metadata.name.as_deref() == Some(LEGACY_INVENTORY_NAME) }

/// Append `-<suffix>` to the object's name. Fails on an empty suffix or when
/// the name already carries it.
pub fn add_suffix_to_name(obj: &mut DynamicObject, suffix: &str) -> Result<(), InventoryError> {
    let suffix = suffix.trim();
    if suffix.is_empty() { return Err(InventoryError::Suffix("passed empty suffix".into())); }
    let name = obj.metadata.name.clone().unwrap_or_default();
    let suffix = format!("-{}", suffix);
    if name.ends_with(&suffix) {
        return Err(InventoryError::Suffix(format!("name already has suffix: {}", name)));
    }
    obj.metadata.name = Some(format!("{}{}", name, suffix));
    Ok(())
}

/// Rename a marker still using [`LEGACY_INVENTORY_NAME`] with a random suffix.
/// Returns whether the name changed.
pub fn fix_legacy_inventory_name<R: Rng + ?Sized>(obj: &mut DynamicObject, rng: &mut R) -> Result<bool, InventoryError> {
    if !is_legacy_name(obj) { return Ok(false); }
    debug!("renaming legacy inventory name");
    add_suffix_to_name(obj, &random_suffix(rng))?;
    Ok(true)
}
