use async_broadcast::{broadcast, Receiver, Sender, TrySendError};
use log::warn;

use crate::{binding::EventBus, module::StateChange, protocol::switch::OnOff};


/// In-process event bus.
///
/// Every state update posted to the hub is broadcast to all subscribers.
/// Posting never blocks: when a subscriber falls behind, its oldest
/// updates are dropped and its next `recv` reports the overflow.
pub struct EventHub {
    updates_send: Sender<StateChange>,

    // keeps the channel open while there are no subscribers
    _updates_recv: async_broadcast::InactiveReceiver<StateChange>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (mut updates_send, updates_recv) = broadcast(capacity);
        updates_send.set_overflow(true);

        Self {
            updates_send,
            _updates_recv: updates_recv.deactivate()
        }
    }

    pub fn subscribe(&self) -> Receiver<StateChange> {
        self.updates_send.new_receiver()
    }
}

impl EventBus for EventHub {
    fn post_update(&mut self, item: &str, state: OnOff) {
        let change = StateChange { item: item.to_string(), state };

        match self.updates_send.try_broadcast(change) {
            Ok(_) | Err(TrySendError::Inactive(_)) => (),
            Err(err) => warn!("Failed to post update for {item}: {err}")
        }
    }
}
