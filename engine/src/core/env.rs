//! Environment layering for step processes.

use std::collections::BTreeMap;

/// Merge environment layers; later layers override earlier ones on key collision.
///
/// The runner passes `[process, config, plan]`, so plan variables win.
pub fn merge_environments<'a, I>(layers: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = &'a BTreeMap<String, String>>,
{
    let mut merged = BTreeMap::new();
    for layer in layers {
        for (key, value) in layer {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}
