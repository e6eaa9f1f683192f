//! Glue between the modules and the outside world.
//!
//! Modules only compute what should happen. The [Binding] carries it out:
//! state changes are posted to the [EventBus], commands are written through
//! the [Transport]. Failures on either side are logged and never propagated,
//! a single failed send must not take the bridge down.

use async_trait::async_trait;
use futures::{Sink, SinkExt};
use log::{debug, error, warn};

use crate::{
    cache::CommandCache,
    module::{Registry, StateChange},
    protocol::{command::Command, switch::OnOff},
};


/// Writes commands to the bus.
#[async_trait]
pub trait Transport {
    async fn send_command(&mut self, command: &Command) -> anyhow::Result<()>;
}

/// Any sink of commands (e.g. the write half of a framed port) is a transport.
#[async_trait]
impl<S> Transport for S where
    S: Sink<Command> + Send + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static
{
    async fn send_command(&mut self, command: &Command) -> anyhow::Result<()> {
        self.send(command.clone()).await?;
        Ok(())
    }
}

/// Receives item state updates.
pub trait EventBus {
    fn post_update(&mut self, item: &str, state: OnOff);
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// No module owns the item.
    UnknownItem,
    /// The command's checksum hasn't been learned.
    ChecksumUnavailable,
    /// The transport failed to send the command.
    Transport,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    Sent,
    Skipped(SkipReason)
}


pub struct Binding<T, E> {
    cache: CommandCache,
    modules: Registry,
    transport: T,
    events: E,
}

impl<T, E> Binding<T, E> where
    T: Transport,
    E: EventBus
{
    pub fn new(cache: CommandCache, modules: Registry, transport: T, events: E) -> Self {
        Self {
            cache,
            modules,
            transport,
            events
        }
    }

    pub fn cache(&self) -> &CommandCache {
        &self.cache
    }

    pub fn modules(&self) -> &Registry {
        &self.modules
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    /// Dispatch a frame received from the bus and post the resulting changes.
    pub fn process_frame(&mut self, frame: &str) -> Vec<StateChange> {
        let changes = self.modules.dispatch(frame);

        for change in &changes {
            self.events.post_update(&change.item, change.state);
        }

        changes
    }

    /// Push a new commanded state for `item` to its module.
    ///
    /// The new state is echoed on the event bus straight away, whether or not
    /// the command can be sent.
    pub async fn publish(&mut self, item: &str, state: OnOff) -> PublishOutcome {
        let Some(publication) = self.modules.command_item(item, state, &self.cache) else {
            warn!("No switch module channel bound to item {item}");
            return PublishOutcome::Skipped(SkipReason::UnknownItem);
        };

        self.events.post_update(&publication.echo.item, publication.echo.state);

        let Some(command) = publication.command else {
            return PublishOutcome::Skipped(SkipReason::ChecksumUnavailable);
        };

        self.send(&command).await
    }

    /// Ask module `name` for its state.
    ///
    /// Returns the sent command so the caller can wait for its response,
    /// `None` if the module is unknown or the request couldn't be sent.
    pub async fn request_status(&mut self, name: &str) -> Option<Command> {
        let Some(module) = self.modules.find(name) else {
            warn!("Unknown module {name}");
            return None;
        };

        let command = module.status_request_command(&self.cache)?;

        match self.send(&command).await {
            PublishOutcome::Sent => Some(command),
            PublishOutcome::Skipped(_) => None,
        }
    }

    async fn send(&mut self, command: &Command) -> PublishOutcome {
        debug!("Sending command {}", command.payload());

        match self.transport.send_command(command).await {
            Ok(()) => PublishOutcome::Sent,
            Err(err) => {
                error!("Error sending command {}: {err:#}", command.payload());
                PublishOutcome::Skipped(SkipReason::Transport)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        module::{switch::ChannelGroup, Module},
        protocol::switch::Group,
        tests::{count_records, init_logger},
    };
    use log::Level;

    use OnOff::*;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Vec<String>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_command(&mut self, command: &Command) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("port closed");
            }
            self.sent.push(command.payload().to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingEvents(Vec<(String, OnOff)>);

    impl EventBus for RecordingEvents {
        fn post_update(&mut self, item: &str, state: OnOff) {
            self.0.push((item.to_string(), state));
        }
    }

    fn binding(address: &str, cache: CommandCache) -> Binding<RecordingTransport, RecordingEvents> {
        let mut registry = Registry::new();

        let mut group = ChannelGroup::new(address.parse().unwrap(), Group::First);
        for i in 1..=6 {
            group.add_channel(format!("ch{i}"), i);
        }
        registry.register(Box::new(group));

        Binding::new(cache, registry, RecordingTransport::default(), RecordingEvents::default())
    }

    fn cache() -> CommandCache {
        CommandCache::from_iter([
            ("$10126C946CE5", "A0"),
            ("$1E156C94000000FF0000FF60E1", "49"),
        ])
    }

    #[tokio::test]
    async fn test_status_poll_scenario() {
        init_logger();

        let mut binding = binding("6C94", cache());

        let request = binding.request_status("6C94-1").await.unwrap();
        assert_eq!(binding.transport().sent, vec!["$10126C946CE5A0"]);

        assert!(binding.process_frame("$0512").is_empty());

        let response = "$1C6C9400000000FF0000557CF8";
        assert!(request.is_response(response));

        let changes = binding.process_frame(response);

        assert_eq!(changes, vec![StateChange { item: "ch4".into(), state: On }]);
        assert_eq!(binding.events().0, vec![("ch4".to_string(), On)]);

        // same state again: nothing posted
        binding.process_frame("$0512");
        assert!(binding.process_frame(response).is_empty());
        assert_eq!(binding.events().0.len(), 1);
    }

    #[tokio::test]
    async fn test_publish_sends_update() {
        init_logger();

        let mut binding = binding("6C94", cache());

        assert_eq!(binding.publish("ch4", On).await, PublishOutcome::Sent);

        assert_eq!(binding.events().0, vec![("ch4".to_string(), On)]);
        assert_eq!(binding.transport().sent, vec!["$1E156C94000000FF0000FF60E149"]);
    }

    #[tokio::test]
    async fn test_publish_without_checksum_echoes_but_does_not_send() {
        init_logger();

        let mut binding = binding("6C94", CommandCache::new());

        let outcome = binding.publish("ch2", On).await;

        assert_eq!(outcome, PublishOutcome::Skipped(SkipReason::ChecksumUnavailable));
        assert_eq!(binding.events().0, vec![("ch2".to_string(), On)]);
        assert!(binding.transport().sent.is_empty());
    }

    #[tokio::test]
    async fn test_publish_unknown_item() {
        init_logger();

        let mut binding = binding("6C94", cache());

        assert_eq!(binding.publish("garage", On).await, PublishOutcome::Skipped(SkipReason::UnknownItem));
        assert!(binding.events().0.is_empty());
        assert!(binding.transport().sent.is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_is_swallowed() {
        init_logger();

        let mut binding = binding("6C94", cache());
        binding.transport.fail = true;

        let outcome = binding.publish("ch4", On).await;

        assert_eq!(outcome, PublishOutcome::Skipped(SkipReason::Transport));
        assert_eq!(binding.events().0, vec![("ch4".to_string(), On)]);
        assert!(count_records(Level::Error, "Error sending command $1E156C94000000FF0000FF60E149") >= 1);

        // state kept, next frames still processed
        binding.process_frame("$0512");
        assert!(binding.process_frame("$1C6C9400000000FF0000557CF8").is_empty());
    }

    #[tokio::test]
    async fn test_request_status_without_checksum_sends_nothing() {
        init_logger();

        let mut binding = binding("7D01", cache());

        assert!(binding.request_status("7D01-1").await.is_none());
        assert!(binding.transport().sent.is_empty());
        assert_eq!(count_records(Level::Error, "Cannot find checksum value in cache for command $10127D01"), 1);
    }

    #[tokio::test]
    async fn test_request_status_unknown_module() {
        init_logger();

        let mut binding = binding("6C94", cache());

        assert!(binding.request_status("6C94-2").await.is_none());
        assert!(binding.transport().sent.is_empty());
    }

    #[tokio::test]
    async fn test_sink_transport() {
        init_logger();

        let (tx, mut rx) = futures::channel::mpsc::unbounded::<Command>();
        let mut binding = Binding::new(cache(), Registry::new(), tx, RecordingEvents::default());

        let group = ChannelGroup::new("6C94".parse().unwrap(), Group::First);
        let command = group.status_request_command(binding.cache()).unwrap();

        binding.transport.send_command(&command).await.unwrap();

        assert_eq!(rx.try_next().unwrap(), Some(command));
    }
}
