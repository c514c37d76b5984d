//! Membership event state machine
//!
//! Applies an incoming membership event to the local view. Terms only move
//! forward, so applying the same set of events in any order converges to the
//! same view, and re-applying an event is a no-op.

use crate::membership::{Member, MembershipList};
use gossip_core::types::*;
use tracing::{debug, info};

/// Effect of an event on one remote member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Stale or irrelevant event
    Ignore,
    /// First time this member is heard of
    Add(MemberStatus),
    /// Known member moves to this status at the event's term
    Update(MemberStatus),
    /// Member is confirmed dead or has left
    Remove,
}

/// Decide what an event does to a remote member currently in `current`
/// (`None` if unknown).
pub fn transition(
    event_type: MembershipEventType,
    event_term: GossipTerm,
    current: Option<(MemberStatus, GossipTerm)>,
) -> Transition {
    use gossip_core::types::MembershipEventType::*;

    match (event_type, current) {
        (Join | Alive, None) => Transition::Add(MemberStatus::Alive),
        (Suspect, None) => Transition::Add(MemberStatus::Suspect),
        (Confirm | Leave, None) => Transition::Ignore,

        (Join | Alive, Some((_, term))) if event_term > term => {
            Transition::Update(MemberStatus::Alive)
        }
        // An ALIVE member is suspected at an equal term too; an already
        // suspected one only at a greater term.
        (Suspect, Some((MemberStatus::Suspect, term))) if event_term > term => {
            Transition::Update(MemberStatus::Suspect)
        }
        (Suspect, Some((MemberStatus::Alive, term))) if event_term >= term => {
            Transition::Update(MemberStatus::Suspect)
        }
        (Confirm | Leave, Some((_, term))) if event_term > term => Transition::Remove,

        _ => Transition::Ignore,
    }
}

/// Change to the membership view worth telling listeners about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
    Added(Member),
    Removed(Member),
    StatusChanged {
        member: Member,
        previous: MemberStatus,
    },
}

/// Result of applying one event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Whether the local view moved
    pub changed: bool,
    /// ALIVE announcement refuting a suspicion of the local member
    pub refutation: Option<MembershipEvent>,
    pub change: Option<MembershipChange>,
}

/// Apply `event` to `membership`.
pub fn apply(membership: &mut MembershipList, event: &MembershipEvent) -> UpdateOutcome {
    if membership.is_local(&event.member) {
        return refute(membership, event);
    }

    let current = membership
        .get(&event.member)
        .map(|member| (member.status, member.term));

    match transition(event.event_type, event.term, current) {
        Transition::Ignore => {
            debug!(event = %event, "Ignoring stale membership event");
            UpdateOutcome::default()
        }
        Transition::Add(status) => {
            let mut member = Member::new(event.member.clone(), event.address, event.term);
            member.status = status;
            info!(member = %event.member, address = %event.address, ?status, term = %event.term, "Member added");
            membership.add(member.clone());
            UpdateOutcome {
                changed: true,
                refutation: None,
                change: Some(MembershipChange::Added(member)),
            }
        }
        Transition::Update(status) => {
            let previous = current.map(|(previous, _)| previous).unwrap_or(status);
            membership.update(&event.member, status, event.term);
            let change = if previous != status {
                info!(member = %event.member, ?previous, ?status, term = %event.term, "Member status changed");
                membership
                    .get(&event.member)
                    .cloned()
                    .map(|member| MembershipChange::StatusChanged { member, previous })
            } else {
                None
            };
            UpdateOutcome {
                changed: true,
                refutation: None,
                change,
            }
        }
        Transition::Remove => {
            let removed = membership.remove(&event.member);
            info!(member = %event.member, kind = ?event.event_type, term = %event.term, "Member removed");
            UpdateOutcome {
                changed: true,
                refutation: None,
                change: removed.map(MembershipChange::Removed),
            }
        }
    }
}

/// Only a suspicion at the local member's current term is acted on: the
/// local term is bumped and a fresh ALIVE is announced.
fn refute(membership: &mut MembershipList, event: &MembershipEvent) -> UpdateOutcome {
    let local = membership.local_mut();
    if event.event_type != MembershipEventType::Suspect
        || event.term != local.term
        || local.status == MemberStatus::Leaving
    {
        return UpdateOutcome::default();
    }

    local.term.increment();
    info!(term = %local.term, "Refuting suspicion of local member");
    UpdateOutcome {
        changed: true,
        refutation: Some(MembershipEvent::new(
            MembershipEventType::Alive,
            local.id.clone(),
            local.address,
            local.term,
        )),
        change: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use gossip_core::types::MembershipEventType::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn list() -> MembershipList {
        MembershipList::new(MemberId::from("self"), addr(1), GossipTerm::new(0, 5))
    }

    fn event(kind: MembershipEventType, id: &str, heartbeat: u64) -> MembershipEvent {
        MembershipEvent::new(kind, MemberId::from(id), addr(2), GossipTerm::new(0, heartbeat))
    }

    fn state(list: &MembershipList, id: &str) -> Option<(MemberStatus, GossipTerm)> {
        list.get(&MemberId::from(id)).map(|m| (m.status, m.term))
    }

    #[test]
    fn test_transition_table() {
        let t = GossipTerm::new(0, 5);
        let older = GossipTerm::new(0, 4);
        let newer = GossipTerm::new(0, 6);
        let alive = Some((MemberStatus::Alive, t));
        let suspect = Some((MemberStatus::Suspect, t));

        assert_eq!(transition(Join, t, None), Transition::Add(MemberStatus::Alive));
        assert_eq!(transition(Suspect, t, None), Transition::Add(MemberStatus::Suspect));
        assert_eq!(transition(Confirm, t, None), Transition::Ignore);
        assert_eq!(transition(Leave, t, None), Transition::Ignore);

        assert_eq!(transition(Alive, newer, suspect), Transition::Update(MemberStatus::Alive));
        assert_eq!(transition(Alive, t, suspect), Transition::Ignore);
        assert_eq!(transition(Join, older, alive), Transition::Ignore);

        assert_eq!(transition(Suspect, t, alive), Transition::Update(MemberStatus::Suspect));
        assert_eq!(transition(Suspect, older, alive), Transition::Ignore);
        assert_eq!(transition(Suspect, t, suspect), Transition::Ignore);
        assert_eq!(transition(Suspect, newer, suspect), Transition::Update(MemberStatus::Suspect));

        assert_eq!(transition(Confirm, newer, alive), Transition::Remove);
        assert_eq!(transition(Leave, newer, suspect), Transition::Remove);
        assert_eq!(transition(Leave, t, alive), Transition::Ignore);
    }

    #[test]
    fn test_idempotence() {
        let mut list = list();
        let alive = event(Alive, "b", 3);

        assert!(apply(&mut list, &alive).changed);
        assert!(!apply(&mut list, &alive).changed);

        let suspect = event(Suspect, "b", 3);
        assert!(apply(&mut list, &suspect).changed);
        assert!(!apply(&mut list, &suspect).changed);
    }

    #[test]
    fn test_unknown_member_bootstrap_as_suspect() {
        let mut list = list();
        let suspect = MembershipEvent::new(
            Suspect,
            MemberId::from("x"),
            addr(9),
            GossipTerm::new(1, 0),
        );

        let outcome = apply(&mut list, &suspect);
        assert!(outcome.changed);
        assert_eq!(
            state(&list, "x"),
            Some((MemberStatus::Suspect, GossipTerm::new(1, 0)))
        );
        assert_eq!(list.get(&MemberId::from("x")).unwrap().address, addr(9));
        assert!(matches!(outcome.change, Some(MembershipChange::Added(_))));
    }

    #[test]
    fn test_remove_and_no_tombstone() {
        let mut list = list();
        apply(&mut list, &event(Join, "b", 1));

        let outcome = apply(&mut list, &event(Leave, "b", 2));
        assert!(outcome.changed);
        assert!(matches!(outcome.change, Some(MembershipChange::Removed(_))));
        assert_eq!(state(&list, "b"), None);

        // Without a tombstone an older ALIVE brings the member back
        assert!(apply(&mut list, &event(Alive, "b", 1)).changed);
        assert!(!apply(&mut list, &event(Confirm, "b", 1)).changed);
    }

    #[test]
    fn test_status_change_reported_once() {
        let mut list = list();
        apply(&mut list, &event(Alive, "b", 1));

        let outcome = apply(&mut list, &event(Alive, "b", 2));
        assert!(outcome.changed);
        assert_eq!(outcome.change, None);

        let outcome = apply(&mut list, &event(Suspect, "b", 2));
        assert!(matches!(
            outcome.change,
            Some(MembershipChange::StatusChanged {
                previous: MemberStatus::Alive,
                ..
            })
        ));
    }

    #[test]
    fn test_self_refutation() {
        let mut list = list();
        let suspect = MembershipEvent::new(
            Suspect,
            MemberId::from("self"),
            addr(1),
            GossipTerm::new(0, 5),
        );

        let outcome = apply(&mut list, &suspect);
        assert!(outcome.changed);
        assert_eq!(list.local().term, GossipTerm::new(0, 6));
        assert_eq!(
            outcome.refutation,
            Some(MembershipEvent::new(
                Alive,
                MemberId::from("self"),
                addr(1),
                GossipTerm::new(0, 6)
            ))
        );

        // The old suspicion no longer matches the local term
        assert_eq!(apply(&mut list, &suspect), UpdateOutcome::default());
    }

    #[test]
    fn test_other_self_events_ignored() {
        let mut list = list();
        for kind in [Join, Alive, Confirm, Leave] {
            let e = MembershipEvent::new(kind, MemberId::from("self"), addr(1), GossipTerm::new(9, 9));
            assert_eq!(apply(&mut list, &e), UpdateOutcome::default());
        }
        let older = MembershipEvent::new(Suspect, MemberId::from("self"), addr(1), GossipTerm::new(0, 4));
        assert_eq!(apply(&mut list, &older), UpdateOutcome::default());
        assert_eq!(list.local().term, GossipTerm::new(0, 5));
        assert_eq!(list.local().status, MemberStatus::Alive);
    }

    #[test]
    fn test_leaving_member_does_not_refute() {
        let mut list = list();
        list.local_mut().status = MemberStatus::Leaving;
        let suspect = MembershipEvent::new(Suspect, MemberId::from("self"), addr(1), GossipTerm::new(0, 5));
        assert!(!apply(&mut list, &suspect).changed);
        assert_eq!(list.local().term, GossipTerm::new(0, 5));
    }

    fn permutations(events: &[MembershipEvent]) -> Vec<Vec<MembershipEvent>> {
        if events.len() <= 1 {
            return vec![events.to_vec()];
        }
        let mut result = Vec::new();
        for i in 0..events.len() {
            let mut rest = events.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head.clone());
                result.push(tail);
            }
        }
        result
    }

    #[test]
    fn test_order_independence() {
        // Terms strictly increase except for the ALIVE/SUSPECT race at (0, 3)
        let events = vec![
            event(Join, "b", 1),
            event(Suspect, "b", 2),
            event(Alive, "b", 3),
            event(Suspect, "b", 3),
            event(Alive, "b", 4),
        ];

        let mut ascending = list();
        for e in &events {
            apply(&mut ascending, e);
        }
        let expected = state(&ascending, "b");
        assert_eq!(expected, Some((MemberStatus::Alive, GossipTerm::new(0, 4))));

        for order in permutations(&events) {
            let mut view = list();
            for e in &order {
                apply(&mut view, e);
            }
            assert_eq!(state(&view, "b"), expected, "order: {:?}", order);
        }
    }

    #[test]
    fn test_alive_suspect_race_converges_to_suspect() {
        let race = [event(Alive, "b", 3), event(Suspect, "b", 3)];
        for order in permutations(&race) {
            let mut view = list();
            for e in &order {
                apply(&mut view, e);
            }
            assert_eq!(
                state(&view, "b"),
                Some((MemberStatus::Suspect, GossipTerm::new(0, 3)))
            );
        }
    }
}
