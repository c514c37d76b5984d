//! Custom event freshness
//!
//! A custom event is new when its sender's term for that event type is
//! strictly greater than the last one recorded for the sender.

use crate::membership::MembershipList;
use gossip_core::types::*;
use tracing::debug;

/// Verdict on an incoming custom event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Term recorded; the event should be re-spread and delivered
    New,
    /// Already seen at this term or later
    Stale,
    /// Sender is not in the membership view
    UnknownSender,
    /// Events claiming to come from the local member are never taken from
    /// peers
    OwnEvent,
}

impl Freshness {
    pub fn is_new(&self) -> bool {
        matches!(self, Freshness::New)
    }
}

/// Check an incoming event against the sender's recorded term and record
/// the event's term when it is new.
pub fn accept(membership: &mut MembershipList, event: &CustomEvent) -> Freshness {
    if membership.is_local(&event.sender) {
        return Freshness::OwnEvent;
    }

    let Some(sender) = membership.get_mut(&event.sender) else {
        debug!(sender = %event.sender, event_type = %event.event_type, "Custom event from unknown sender");
        return Freshness::UnknownSender;
    };

    match sender.custom_term(&event.event_type) {
        Some(known) if !event.sender_term.is_greater_than(&known) => Freshness::Stale,
        _ => {
            sender.set_custom_term(event.event_type.clone(), event.sender_term);
            Freshness::New
        }
    }
}

/// Term for the local member's next event of `event_type`: one heartbeat
/// past the previous event of that type, or the local term for the first.
pub fn next_local_term(membership: &mut MembershipList, event_type: &EventType) -> GossipTerm {
    let local = membership.local_mut();
    let term = match local.custom_term(event_type) {
        Some(previous) => previous.next().max(local.term),
        None => local.term,
    };
    local.set_custom_term(event_type.clone(), term);
    term
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::Member;
    use std::net::SocketAddr;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn list() -> MembershipList {
        let mut list = MembershipList::new(MemberId::from("self"), addr(1), GossipTerm::new(7, 0));
        list.add(Member::new(MemberId::from("b"), addr(2), GossipTerm::new(3, 0)));
        list
    }

    fn custom(sender: &str, heartbeat: u64) -> CustomEvent {
        CustomEvent::new(
            EventType::from("leader"),
            MemberId::from(sender),
            GossipTerm::new(3, heartbeat),
            vec![heartbeat as u8],
        )
    }

    #[test]
    fn test_first_event_is_new() {
        let mut list = list();
        assert_eq!(accept(&mut list, &custom("b", 0)), Freshness::New);
        assert_eq!(
            list.get(&MemberId::from("b")).unwrap().custom_term(&EventType::from("leader")),
            Some(GossipTerm::new(3, 0))
        );
    }

    #[test]
    fn test_duplicate_and_older_are_stale() {
        let mut list = list();
        assert!(accept(&mut list, &custom("b", 2)).is_new());
        assert_eq!(accept(&mut list, &custom("b", 2)), Freshness::Stale);
        assert_eq!(accept(&mut list, &custom("b", 1)), Freshness::Stale);
        assert!(accept(&mut list, &custom("b", 3)).is_new());
    }

    #[test]
    fn test_terms_tracked_per_event_type() {
        let mut list = list();
        assert!(accept(&mut list, &custom("b", 2)).is_new());

        let mut other = custom("b", 2);
        other.event_type = EventType::from("partition");
        assert!(accept(&mut list, &other).is_new());
    }

    #[test]
    fn test_unknown_and_own_sender() {
        let mut list = list();
        assert_eq!(accept(&mut list, &custom("z", 0)), Freshness::UnknownSender);
        assert_eq!(accept(&mut list, &custom("self", 99)), Freshness::OwnEvent);
    }

    #[test]
    fn test_next_local_term() {
        let mut list = list();
        let leader = EventType::from("leader");
        assert_eq!(next_local_term(&mut list, &leader), GossipTerm::new(7, 0));
        assert_eq!(next_local_term(&mut list, &leader), GossipTerm::new(7, 1));

        list.local_mut().term = GossipTerm::new(7, 5);
        assert_eq!(next_local_term(&mut list, &leader), GossipTerm::new(7, 5));
        assert_eq!(
            list.local().custom_term(&leader),
            Some(GossipTerm::new(7, 5))
        );
    }
}
