//! Local membership view
//!
//! Holds the local member and every remote member currently believed to be
//! ALIVE or SUSPECT. Removed members are dropped entirely; no tombstones are
//! kept.

use crate::dissemination::MembershipEventSupplier;
use gossip_core::types::*;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

/// Member information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: MemberId,
    pub address: SocketAddr,
    pub status: MemberStatus,
    pub term: GossipTerm,
    /// Latest term seen per custom event type sent by this member
    custom_terms: HashMap<EventType, GossipTerm>,
}

impl Member {
    /// Create an ALIVE member
    pub fn new(id: MemberId, address: SocketAddr, term: GossipTerm) -> Self {
        Self {
            id,
            address,
            status: MemberStatus::Alive,
            term,
            custom_terms: HashMap::new(),
        }
    }

    /// Latest known term for custom events of the given type
    pub fn custom_term(&self, event_type: &EventType) -> Option<GossipTerm> {
        self.custom_terms.get(event_type).copied()
    }

    pub fn set_custom_term(&mut self, event_type: EventType, term: GossipTerm) {
        self.custom_terms.insert(event_type, term);
    }

    /// Membership event describing the current status, if the status has one
    pub fn to_event(&self) -> Option<MembershipEvent> {
        self.status.event_type().map(|event_type| {
            MembershipEvent::new(event_type, self.id.clone(), self.address, self.term)
        })
    }
}

/// Membership directory owned by the gossip engine
#[derive(Debug)]
pub struct MembershipList {
    local: Member,
    members: BTreeMap<MemberId, Member>,
}

impl MembershipList {
    pub fn new(local_id: MemberId, local_address: SocketAddr, local_term: GossipTerm) -> Self {
        Self {
            local: Member::new(local_id, local_address, local_term),
            members: BTreeMap::new(),
        }
    }

    pub fn local(&self) -> &Member {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut Member {
        &mut self.local
    }

    pub fn is_local(&self, id: &MemberId) -> bool {
        self.local.id == *id
    }

    /// Look up a member by id, the local member included
    pub fn get(&self, id: &MemberId) -> Option<&Member> {
        if self.is_local(id) {
            Some(&self.local)
        } else {
            self.members.get(id)
        }
    }

    pub fn get_mut(&mut self, id: &MemberId) -> Option<&mut Member> {
        if self.is_local(id) {
            Some(&mut self.local)
        } else {
            self.members.get_mut(id)
        }
    }

    /// Look up a member by network address, the local member included
    pub fn get_by_address(&self, address: &SocketAddr) -> Option<&Member> {
        if self.local.address == *address {
            return Some(&self.local);
        }
        self.members.values().find(|m| m.address == *address)
    }

    /// Insert a remote member, replacing any previous entry with the same id.
    /// The local member cannot be replaced.
    pub fn add(&mut self, member: Member) -> bool {
        if self.is_local(&member.id) {
            return false;
        }
        self.members.insert(member.id.clone(), member);
        true
    }

    pub fn remove(&mut self, id: &MemberId) -> Option<Member> {
        self.members.remove(id)
    }

    /// Set status and term of a remote member
    pub fn update(&mut self, id: &MemberId, status: MemberStatus, term: GossipTerm) -> bool {
        match self.members.get_mut(id) {
            Some(member) => {
                member.status = status;
                member.term = term;
                true
            }
            None => false,
        }
    }

    /// Remote members in id order
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    /// Number of remote members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Remote members plus the local one
    pub fn cluster_size(&self) -> usize {
        self.members.len() + 1
    }

    /// Event source describing the whole current view
    pub fn full_state(&self) -> FullStateSupplier<'_> {
        FullStateSupplier { membership: self }
    }
}

/// Emits one event per member of the current view, local member first.
///
/// Used instead of the dissemination pools when a peer needs everything this
/// node believes rather than what changed recently. There is no spread
/// count here, so draining and viewing are the same.
pub struct FullStateSupplier<'a> {
    membership: &'a MembershipList,
}

impl FullStateSupplier<'_> {
    fn events(&self, limit: usize) -> Vec<MembershipEvent> {
        std::iter::once(&self.membership.local)
            .chain(self.membership.members.values())
            .filter_map(Member::to_event)
            .take(limit)
            .collect()
    }
}

impl MembershipEventSupplier for FullStateSupplier<'_> {
    fn membership_event_view(&self, limit: usize) -> Vec<MembershipEvent> {
        self.events(limit)
    }

    fn membership_event_drain(&mut self, limit: usize) -> Vec<MembershipEvent> {
        self.events(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn create_test_list() -> MembershipList {
        let mut list = MembershipList::new(MemberId::from("a"), addr(1), GossipTerm::new(0, 1));
        list.add(Member::new(MemberId::from("b"), addr(2), GossipTerm::new(0, 2)));
        list.add(Member::new(MemberId::from("c"), addr(3), GossipTerm::new(0, 3)));
        list
    }

    #[test]
    fn test_lookup() {
        let list = create_test_list();
        assert_eq!(list.get(&MemberId::from("a")).unwrap().address, addr(1));
        assert_eq!(list.get_by_address(&addr(3)).unwrap().id, MemberId::from("c"));
        assert!(list.get(&MemberId::from("x")).is_none());
        assert!(list.get_by_address(&addr(9)).is_none());
        assert_eq!(list.len(), 2);
        assert_eq!(list.cluster_size(), 3);
    }

    #[test]
    fn test_local_member_protected() {
        let mut list = create_test_list();
        assert!(!list.add(Member::new(MemberId::from("a"), addr(7), GossipTerm::new(9, 9))));
        assert!(list.remove(&MemberId::from("a")).is_none());
        assert!(!list.update(&MemberId::from("a"), MemberStatus::Suspect, GossipTerm::new(9, 9)));
        assert_eq!(list.local().address, addr(1));
    }

    #[test]
    fn test_update_and_remove() {
        let mut list = create_test_list();
        let b = MemberId::from("b");
        assert!(list.update(&b, MemberStatus::Suspect, GossipTerm::new(0, 4)));
        assert_eq!(list.get(&b).unwrap().status, MemberStatus::Suspect);

        assert!(list.remove(&b).is_some());
        assert!(list.get(&b).is_none());
        assert!(!list.update(&b, MemberStatus::Alive, GossipTerm::new(0, 5)));
    }

    #[test]
    fn test_full_state_includes_local_and_skips_leaving() {
        let mut list = create_test_list();
        list.update(&MemberId::from("c"), MemberStatus::Suspect, GossipTerm::new(0, 3));

        let events = list.full_state().membership_event_view(usize::MAX);
        let summary: Vec<_> = events
            .iter()
            .map(|e| (e.member.as_str().to_string(), e.event_type))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a".to_string(), MembershipEventType::Alive),
                ("b".to_string(), MembershipEventType::Alive),
                ("c".to_string(), MembershipEventType::Suspect),
            ]
        );

        list.local_mut().status = MemberStatus::Leaving;
        let mut supplier = list.full_state();
        assert_eq!(supplier.membership_event_drain(usize::MAX).len(), 2);
        assert_eq!(supplier.membership_event_drain(1).len(), 1);
    }

    #[test]
    fn test_custom_terms() {
        let mut member = Member::new(MemberId::from("b"), addr(2), GossipTerm::default());
        let leader = EventType::from("leader");
        assert_eq!(member.custom_term(&leader), None);

        member.set_custom_term(leader.clone(), GossipTerm::new(1, 2));
        assert_eq!(member.custom_term(&leader), Some(GossipTerm::new(1, 2)));
    }
}
