//! Application listeners
//!
//! Every listener call is isolated: an error or a panic in one listener is
//! logged and never stops delivery to the others.

use crate::updater::MembershipChange;
use gossip_core::types::*;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Receives custom events judged new by the freshness check
pub trait CustomEventListener: Send + Sync + 'static {
    fn on_event(&self, event: &CustomEvent) -> anyhow::Result<()>;
}

impl<F> CustomEventListener for F
where
    F: Fn(&CustomEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn on_event(&self, event: &CustomEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Receives changes of the membership view
pub trait MembershipListener: Send + Sync + 'static {
    fn on_change(&self, change: &MembershipChange) -> anyhow::Result<()>;
}

impl<F> MembershipListener for F
where
    F: Fn(&MembershipChange) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn on_change(&self, change: &MembershipChange) -> anyhow::Result<()> {
        self(change)
    }
}

/// Identity comparison ignoring vtables
fn same<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Run one listener call, logging failures. Returns whether it succeeded.
fn isolated(kind: &str, call: impl FnOnce() -> anyhow::Result<()>) -> bool {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(listener = kind, error = %e, "Listener failed");
            false
        }
        Err(_) => {
            warn!(listener = kind, "Listener panicked");
            false
        }
    }
}

/// Registered listeners
#[derive(Default)]
pub struct ListenerRegistry {
    custom: Vec<(EventType, Arc<dyn CustomEventListener>)>,
    membership: Vec<Arc<dyn MembershipListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_custom_event_listener(
        &mut self,
        event_type: EventType,
        listener: Arc<dyn CustomEventListener>,
    ) {
        self.custom.push((event_type, listener));
    }

    /// Remove every registration of `listener`, returning how many were removed
    pub fn remove_custom_event_listener(&mut self, listener: &Arc<dyn CustomEventListener>) -> usize {
        let before = self.custom.len();
        self.custom.retain(|(_, registered)| !same(registered, listener));
        before - self.custom.len()
    }

    pub fn add_membership_listener(&mut self, listener: Arc<dyn MembershipListener>) {
        self.membership.push(listener);
    }

    pub fn remove_membership_listener(&mut self, listener: &Arc<dyn MembershipListener>) -> usize {
        let before = self.membership.len();
        self.membership.retain(|registered| !same(registered, listener));
        before - self.membership.len()
    }

    /// Deliver to every listener registered for the event's type.
    /// Returns the number of listeners that handled it successfully.
    pub fn dispatch_custom_event(&self, event: &CustomEvent) -> usize {
        self.custom
            .iter()
            .filter(|(event_type, _)| event_type.as_bytes() == event.event_type.as_bytes())
            .filter(|(_, listener)| isolated("custom-event", || listener.on_event(event)))
            .count()
    }

    pub fn notify_membership(&self, change: &MembershipChange) -> usize {
        self.membership
            .iter()
            .filter(|listener| isolated("membership", || listener.on_change(change)))
            .count()
    }
}
