//! Peer groups: the set of records realized by one materialization.

use crate::record::RecordId;
use std::rc::Rc;

/// Records materialized together in one pass.
///
/// A group only names its members by [`RecordId`]; it never owns them. The
/// record store decides which members are still alive, so releasing a record
/// removes it from its group without any teardown here. The group itself is
/// shared by its members through [`PeerGroupRef`] and is dropped with the last
/// of them.
#[derive(Debug, PartialEq, Eq)]
pub struct PeerGroup {
    members: Box<[RecordId]>,
}

/// Shared handle to a peer group.
pub type PeerGroupRef = Rc<PeerGroup>;

impl PeerGroup {
    /// Create a group over `members`, in materialization order.
    #[must_use]
    pub fn new(members: Vec<RecordId>) -> PeerGroupRef {
        Rc::new(Self {
            members: members.into_boxed_slice(),
        })
    }

    /// Member identities as assigned at creation (including released ones).
    #[must_use]
    pub fn members(&self) -> &[RecordId] {
        &self.members
    }

    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.members.contains(&id)
    }

    /// Number of members assigned at creation.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
