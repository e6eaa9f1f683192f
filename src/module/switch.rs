//! Switch module channel groups.
//!
//! A switch module exposes its outputs in groups of six channels. The compact
//! module (05-002-02) has a single group, the large module (05-000-02) has
//! channels 1-6 in the first group and 7-12 in the second. Each group is
//! queried and updated independently and is modelled by a [ChannelGroup].

use std::time::SystemTime;

use log::{debug, trace, warn};

use crate::{
    cache::CommandCache,
    protocol::{
        address::ModuleAddress,
        command::{Command, PartialCommand, STATUS_CHANGE_CMD, STATUS_REQUEST_ACK, STATUS_REQUEST_CMD, STATUS_REQUEST_TIMEOUT, STATUS_RESPONSE},
        switch::{decode_states, encode_states, Group, OnOff, GROUP_SIZE, HIGH_BYTE},
    },
};

use super::{Module, Publication, StateChange};


/// One physical output of a switch module, bound to an item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Channel {
    name: String,
    address: ModuleAddress,
    state: OnOff,
}

impl Channel {
    fn new(name: String, address: ModuleAddress) -> Self {
        Self { name, address, state: OnOff::Off }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &ModuleAddress {
        &self.address
    }

    pub fn state(&self) -> OnOff {
        self.state
    }
}


/// Where the next status response on the bus is expected to go.
///
/// Only one request is in flight on the bus at a time. The ACK for a status
/// request carries the group code, the response that follows carries the
/// address, so a response is only accepted when both match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PendingResponse {
    #[default]
    Idle,
    AwaitingResponseForSelf,
    AwaitingResponseForOther,
}


#[derive(Debug)]
pub struct ChannelGroup {
    address: ModuleAddress,
    group: Group,
    channels: [Option<Channel>; GROUP_SIZE],
    pending: PendingResponse,
    last_updated: Option<SystemTime>,
}

impl ChannelGroup {
    pub fn new(address: ModuleAddress, group: Group) -> Self {
        Self {
            address,
            group,
            channels: Default::default(),
            pending: PendingResponse::Idle,
            last_updated: None
        }
    }

    pub fn group(&self) -> Group {
        self.group
    }

    /// Bind channel `number` (1-12) to item `name`.
    ///
    /// Numbers 7-12 map onto the same slots as 1-6. Any other number binds
    /// nothing and returns `None`.
    pub fn add_channel(&mut self, name: impl Into<String>, number: u8) -> Option<&Channel> {
        let name = name.into();

        trace!("Adding channel {name}");

        let number = if number > GROUP_SIZE as u8 { number - GROUP_SIZE as u8 } else { number };
        if !(1..=GROUP_SIZE as u8).contains(&number) {
            return None;
        }

        let slot = &mut self.channels[number as usize - 1];
        *slot = Some(Channel::new(name, self.address.clone()));
        slot.as_ref()
    }

    /// Channel bound to `slot` (1-6).
    pub fn channel(&self, slot: usize) -> Option<&Channel> {
        self.channels.get(slot.checked_sub(1)?)?.as_ref()
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter().flatten()
    }

    pub fn pending(&self) -> PendingResponse {
        self.pending
    }

    /// When the module last reported the state of this group.
    pub fn last_updated(&self) -> Option<SystemTime> {
        self.last_updated
    }

    /// Status request for this group, before checksum completion.
    pub fn status_request(&self) -> Option<PartialCommand> {
        let body = format!("{}{}", self.group.request_code(), self.address);

        Some(PartialCommand::new(STATUS_REQUEST_CMD, &body)?
            .expecting(format!("{STATUS_RESPONSE}{}", self.address), STATUS_REQUEST_TIMEOUT))
    }

    /// Status change command pushing the stored state of all six channels,
    /// before checksum completion. Unbound slots are sent as off.
    pub fn status_update(&self) -> Option<PartialCommand> {
        let mut states = [OnOff::Off; GROUP_SIZE];
        for (state, channel) in states.iter_mut().zip(self.channels.iter()) {
            if let Some(channel) = channel {
                *state = channel.state;
            }
        }

        let body = format!("{}{}{}{HIGH_BYTE}", self.group.change_code(), self.address, encode_states(&states));

        PartialCommand::new(STATUS_CHANGE_CMD, &body)
    }

    /// Store a new commanded state for the channel bound to `item` and build
    /// the command pushing it to the module.
    ///
    /// Returns `None` if no channel of this group is bound to `item`.
    pub fn publish_state(&mut self, item: &str, state: OnOff, cache: &CommandCache) -> Option<Publication> {
        let channel = self.channels.iter_mut().flatten().find(|channel| channel.name == item)?;
        channel.state = state;

        trace!("Publishing group {} status to eventbus and nikobus", self.name());

        let echo = StateChange { item: item.to_string(), state };

        let command = match self.status_update() {
            Some(cmd) => cmd.complete(cache).ok(),
            None => {
                warn!("Cannot encode status update for group {}", self.name());
                None
            }
        };

        Some(Publication { echo, command })
    }

    /// Feed a frame from the bus to this group.
    ///
    /// Tracks status request ACKs and, if the frame is the response to this
    /// group's request, updates the stored channel states. Only channels
    /// whose state actually changed are returned.
    pub fn process_frame(&mut self, frame: &str) -> Vec<StateChange> {
        // ACK for a status request: ours, or someone else's
        if frame.starts_with(STATUS_REQUEST_ACK) {
            self.pending = if frame.starts_with(self.group.request_ack()) {
                PendingResponse::AwaitingResponseForSelf
            } else {
                PendingResponse::AwaitingResponseForOther
            };
            return vec![];
        }

        let Some(rest) = frame.strip_prefix(STATUS_RESPONSE) else {
            return vec![];
        };

        let pending = std::mem::take(&mut self.pending);

        if !rest.starts_with(self.address.as_str()) || pending != PendingResponse::AwaitingResponseForSelf {
            return vec![];
        }

        let Some(states) = decode_states(frame) else {
            warn!("Discarding truncated status response {frame} for module {}", self.name());
            return vec![];
        };

        debug!("Processing nikobus command {frame} for module ({})", self.name());
        self.last_updated = Some(SystemTime::now());

        self.channels.iter_mut()
            .zip(states)
            .filter_map(|(channel, state)| {
                let channel = channel.as_mut()?;

                if channel.state == state {
                    return None;
                }

                channel.state = state;
                Some(StateChange { item: channel.name.clone(), state })
            })
            .collect()
    }
}

impl Module for ChannelGroup {
    fn address(&self) -> &ModuleAddress {
        &self.address
    }

    fn name(&self) -> String {
        format!("{}-{}", self.address, self.group.number())
    }

    fn status_request_command(&self, cache: &CommandCache) -> Option<Command> {
        self.status_request()?.complete(cache).ok()
    }

    fn process_frame(&mut self, frame: &str) -> Vec<StateChange> {
        ChannelGroup::process_frame(self, frame)
    }

    fn command_item(&mut self, item: &str, state: OnOff, cache: &CommandCache) -> Option<Publication> {
        self.publish_state(item, state, cache)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{init_logger, count_records};
    use log::Level;

    use OnOff::*;

    const RESPONSE_CH4_ON: &str = "$1C6C9400000000FF0000557CF8";

    fn address(s: &str) -> ModuleAddress {
        s.parse().unwrap()
    }

    fn cache() -> CommandCache {
        CommandCache::from_iter([
            ("$10126C946CE5", "A0"),
            ("$10176C948715", "BB"),
            ("$1E156C94000000FF0000FF60E1", "49"),
            ("$1E166C940000000000FFFF9972", "95"),
        ])
    }

    /// First group of 6C94 with all six channels bound, named ch1..ch6.
    fn full_group() -> ChannelGroup {
        let mut group = ChannelGroup::new(address("6C94"), Group::First);
        for i in 1..=6 {
            group.add_channel(format!("ch{i}"), i);
        }
        group
    }

    fn states(group: &ChannelGroup) -> Vec<OnOff> {
        (1..=6).map(|slot| group.channel(slot).map_or(Off, Channel::state)).collect()
    }

    #[test]
    fn test_name() {
        let group = ChannelGroup::new(address("6c94"), Group::Second);
        assert_eq!(group.name(), "6C94-2");
        assert_eq!(group.address().as_str(), "6C94");
    }

    #[test]
    fn test_add_channel_folds_second_group() {
        init_logger();

        let mut group = ChannelGroup::new(address("6C94"), Group::Second);

        let channel = group.add_channel("hall", 8).cloned().unwrap();
        assert_eq!(channel.name(), "hall");
        assert_eq!(channel.address().as_str(), "6C94");
        assert_eq!(channel.state(), Off);
        assert_eq!(group.channel(2), Some(&channel));
        assert_eq!(group.channels().count(), 1);
    }

    #[test]
    fn test_add_channel_rejects_out_of_range() {
        init_logger();

        let mut group = ChannelGroup::new(address("6C94"), Group::Second);

        assert!(group.add_channel("bad", 13).is_none());
        assert!(group.add_channel("bad", 0).is_none());
        assert_eq!(group.channels().count(), 0);
    }

    #[test]
    fn test_status_request_command() {
        init_logger();

        let group = ChannelGroup::new(address("6C94"), Group::First);
        let cmd = group.status_request_command(&cache()).unwrap();

        assert_eq!(cmd.payload(), "$10126C946CE5A0");
        assert_eq!(cmd.expected_response(), Some("$1C6C94"));
        assert_eq!(cmd.timeout(), Some(STATUS_REQUEST_TIMEOUT));

        let group = ChannelGroup::new(address("6C94"), Group::Second);
        let cmd = group.status_request_command(&cache()).unwrap();

        assert_eq!(cmd.payload(), "$10176C948715BB");
    }

    #[test]
    fn test_status_request_without_checksum() {
        init_logger();

        let group = ChannelGroup::new(address("5A01"), Group::First);
        let base = group.status_request().unwrap().base().to_string();

        assert!(group.status_request_command(&cache()).is_none());
        assert_eq!(count_records(Level::Error, &base), 1);
    }

    #[test]
    fn test_status_update_encodes_unbound_slots_as_off() {
        init_logger();

        let mut group = ChannelGroup::new(address("6C94"), Group::First);
        group.add_channel("kitchen", 4);

        let publication = group.publish_state("kitchen", On, &cache()).unwrap();

        assert_eq!(publication.echo, StateChange { item: "kitchen".into(), state: On });
        assert_eq!(publication.command.unwrap().payload(), "$1E156C94000000FF0000FF60E149");
    }

    #[test]
    fn test_status_update_second_group() {
        init_logger();

        let mut group = ChannelGroup::new(address("6C94"), Group::Second);
        group.add_channel("garden", 12);

        let publication = group.publish_state("garden", On, &cache()).unwrap();

        assert_eq!(publication.command.unwrap().payload(), "$1E166C940000000000FFFF997295");
    }

    #[test]
    fn test_publish_without_checksum_keeps_echo() {
        init_logger();

        let mut group = full_group();

        let publication = group.publish_state("ch1", On, &cache()).unwrap();

        assert_eq!(publication.echo.state, On);
        assert!(publication.command.is_none());
        assert_eq!(group.channel(1).unwrap().state(), On);
        assert!(count_records(Level::Error, "$1E156C94FF0000000000FF") >= 1);
    }

    #[test]
    fn test_publish_unknown_item() {
        init_logger();

        let mut group = full_group();

        assert!(group.publish_state("nope", On, &cache()).is_none());
        assert_eq!(states(&group), vec![Off; 6]);
    }

    #[test]
    fn test_ack_then_response_updates_changed_channel() {
        init_logger();

        let mut group = full_group();

        assert!(group.process_frame("$0512").is_empty());
        assert_eq!(group.pending(), PendingResponse::AwaitingResponseForSelf);

        let changes = group.process_frame(RESPONSE_CH4_ON);

        assert_eq!(changes, vec![StateChange { item: "ch4".into(), state: On }]);
        assert_eq!(states(&group), vec![Off, Off, Off, On, Off, Off]);
        assert!(group.last_updated().is_some());
        assert_eq!(group.pending(), PendingResponse::Idle);
    }

    #[test]
    fn test_unchanged_response_emits_nothing() {
        init_logger();

        let mut group = full_group();

        group.process_frame("$0512");
        assert_eq!(group.process_frame(RESPONSE_CH4_ON).len(), 1);

        group.process_frame("$0512");
        assert!(group.process_frame(RESPONSE_CH4_ON).is_empty());
        assert!(group.last_updated().is_some());
    }

    #[test]
    fn test_response_turns_channel_off() {
        init_logger();

        let mut group = full_group();
        group.publish_state("ch1", On, &cache());

        group.process_frame("$0512");
        let changes = group.process_frame(RESPONSE_CH4_ON);

        assert_eq!(changes, vec![
            StateChange { item: "ch1".into(), state: Off },
            StateChange { item: "ch4".into(), state: On },
        ]);
    }

    #[test]
    fn test_response_without_ack_is_discarded() {
        init_logger();

        let mut group = full_group();

        assert!(group.process_frame(RESPONSE_CH4_ON).is_empty());
        assert_eq!(states(&group), vec![Off; 6]);
        assert!(group.last_updated().is_none());
    }

    #[test]
    fn test_response_after_other_groups_ack_is_discarded() {
        init_logger();

        let mut group = full_group();

        group.process_frame("$0517");
        assert_eq!(group.pending(), PendingResponse::AwaitingResponseForOther);

        assert!(group.process_frame(RESPONSE_CH4_ON).is_empty());
        assert_eq!(group.pending(), PendingResponse::Idle);
        assert!(group.last_updated().is_none());
    }

    #[test]
    fn test_response_for_other_address_is_discarded() {
        init_logger();

        let mut group = full_group();

        group.process_frame("$0512");
        assert!(group.process_frame("$1C6C9500000000FF0000557CF8").is_empty());
        assert_eq!(group.pending(), PendingResponse::Idle);
        assert!(group.last_updated().is_none());

        // the flag was consumed by the foreign response
        assert!(group.process_frame(RESPONSE_CH4_ON).is_empty());
        assert_eq!(states(&group), vec![Off; 6]);
    }

    #[test]
    fn test_discarded_response_keeps_last_updated() {
        init_logger();

        let mut group = full_group();

        group.process_frame("$0512");
        assert_eq!(group.process_frame(RESPONSE_CH4_ON).len(), 1);
        let updated = group.last_updated();
        assert!(updated.is_some());

        // no ACK
        assert!(group.process_frame("$1C6C9400000000000000557CF8").is_empty());
        assert_eq!(group.last_updated(), updated);

        // someone else's ACK
        group.process_frame("$0517");
        assert!(group.process_frame("$1C6C9400000000000000557CF8").is_empty());
        assert_eq!(group.last_updated(), updated);

        // foreign address
        group.process_frame("$0512");
        assert!(group.process_frame("$1C6C9500000000000000557CF8").is_empty());
        assert_eq!(group.last_updated(), updated);

        assert_eq!(states(&group), vec![Off, Off, Off, On, Off, Off]);
    }

    #[test]
    fn test_unrelated_frames_keep_pending_state() {
        init_logger();

        let mut group = full_group();

        group.process_frame("$0512");
        assert!(group.process_frame("#N123456").is_empty());
        assert!(group.process_frame("$0EFF6C94009A").is_empty());
        assert_eq!(group.pending(), PendingResponse::AwaitingResponseForSelf);

        assert_eq!(group.process_frame(RESPONSE_CH4_ON).len(), 1);
    }

    #[test]
    fn test_truncated_response_is_discarded() {
        init_logger();

        let mut group = full_group();

        group.process_frame("$0512");
        assert!(group.process_frame("$1C6C9400000000").is_empty());
        assert!(group.last_updated().is_none());
        assert_eq!(count_records(Level::Warn, "$1C6C9400000000 "), 1);
    }

    #[test]
    fn test_unbound_slots_are_skipped() {
        init_logger();

        let mut group = ChannelGroup::new(address("6C94"), Group::First);
        group.add_channel("only", 1);

        group.process_frame("$0512");
        assert!(group.process_frame(RESPONSE_CH4_ON).is_empty());
        assert!(group.last_updated().is_some());
    }
}
