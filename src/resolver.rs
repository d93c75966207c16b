use tokio::time::Instant;

use crate::table::LockTable;

/// Pick the victim for a detected cycle: the member whose most recently
/// acquired lock is the newest. Cycle members that no longer hold anything
/// (released concurrently with detection) are skipped.
pub fn select_victim<'a>(cycle: &'a [String], table: &LockTable) -> Option<&'a str> {
    let mut victim: Option<(&'a str, Instant)> = None;
    for owner in cycle {
        let newest = table
            .owned_resources(owner)
            .into_iter()
            .filter_map(|resource| table.holder(&resource).map(|lock| lock.acquired_at))
            .max();
        if let Some(acquired_at) = newest {
            match victim {
                Some((_, best)) if acquired_at <= best => {}
                _ => victim = Some((owner, acquired_at)),
            }
        }
    }
    victim.map(|(owner, _)| owner)
}
