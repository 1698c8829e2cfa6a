//! Peer group formation and live-membership resolution.

use crate::store::RecordStore;
use autoprefetch_core::{PeerGroup, PeerGroupRef, RecordId};
use std::rc::Rc;

/// Minimum number of records a materialization needs to form a group.
pub const MIN_PEERS: usize = 2;

/// Form a peer group over the records of one materialized result set.
///
/// Returns `None` (and assigns nothing) when fewer than [`MIN_PEERS`] of the
/// ids are live in the store. Must be called once per result set; records
/// that already belong to a group keep their original one.
pub fn form_group(store: &mut RecordStore, ids: &[RecordId]) -> Option<PeerGroupRef> {
    let members: Vec<RecordId> = ids.iter().copied().filter(|id| store.contains(*id)).collect();
    if members.len() < MIN_PEERS {
        return None;
    }

    let group = PeerGroup::new(members);
    for id in group.members() {
        let Some(record) = store.get_mut(*id) else {
            continue;
        };
        if record.assign_peers(Rc::clone(&group)).is_err() {
            tracing::warn!(
                target: "autoprefetch::peers",
                record = %id,
                "Record already belongs to a peer group; keeping the original"
            );
        }
    }

    tracing::trace!(
        target: "autoprefetch::peers",
        size = group.len(),
        "Formed peer group"
    );
    Some(group)
}

/// Members of `group` still held by `store`, in materialization order.
pub fn live_members<'a>(
    store: &'a RecordStore,
    group: &'a PeerGroup,
) -> impl Iterator<Item = RecordId> + 'a {
    group
        .members()
        .iter()
        .copied()
        .filter(move |id| store.contains(*id))
}

/// Number of members of `group` still held by `store`.
#[must_use]
pub fn live_len(store: &RecordStore, group: &PeerGroup) -> usize {
    live_members(store, group).count()
}
