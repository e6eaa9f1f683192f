//! Modules on the bus and the registry frames are dispatched through.

pub mod switch;

use log::trace;

use crate::{
    cache::CommandCache,
    protocol::{address::ModuleAddress, command::Command, switch::OnOff},
};


/// A state change of an item, to be posted on the event bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateChange {
    pub item: String,
    pub state: OnOff,
}

/// Result of commanding an item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Publication {
    /// Optimistic echo of the new state, posted before the module confirms it.
    pub echo: StateChange,
    /// Command pushing the new state to the module, `None` if it couldn't be
    /// completed (no learned checksum).
    pub command: Option<Command>,
}


/// Capabilities shared by every kind of module the registry dispatches to.
pub trait Module {
    fn address(&self) -> &ModuleAddress;

    /// Unique name of the module, used to address it from the poller.
    fn name(&self) -> String;

    /// Command asking the module to report its state.
    ///
    /// `None` if the command can't be built, e.g. its checksum is unknown.
    fn status_request_command(&self, cache: &CommandCache) -> Option<Command>;

    /// Process a frame seen on the bus, returning the resulting state changes.
    ///
    /// Called for every frame, including frames meant for other modules.
    fn process_frame(&mut self, frame: &str) -> Vec<StateChange>;

    /// Handle a new commanded state for `item`.
    ///
    /// `None` if this module doesn't own `item`.
    fn command_item(&mut self, _item: &str, _state: OnOff, _cache: &CommandCache) -> Option<Publication> {
        None
    }
}


/// Routes frames to every registered module.
#[derive(Default)]
pub struct Registry {
    modules: Vec<Box<dyn Module + Send>>
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Box<dyn Module + Send>) {
        trace!("Registering module {}", module.name());
        self.modules.push(module);
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn modules(&self) -> impl Iterator<Item = &(dyn Module + Send)> {
        self.modules.iter().map(|module| module.as_ref())
    }

    pub fn find(&self, name: &str) -> Option<&(dyn Module + Send)> {
        self.modules().find(|module| module.name() == name)
    }

    /// Names of all modules, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.modules.iter().map(|module| module.name()).collect()
    }

    /// Hand `frame` to every module, collecting their state changes in registration order.
    pub fn dispatch(&mut self, frame: &str) -> Vec<StateChange> {
        self.modules.iter_mut()
            .flat_map(|module| module.process_frame(frame))
            .collect()
    }

    /// Status requests of all modules. Modules whose request can't be built are skipped.
    pub fn status_requests(&self, cache: &CommandCache) -> Vec<Command> {
        self.modules.iter()
            .filter_map(|module| module.status_request_command(cache))
            .collect()
    }

    /// Forward a commanded state to the first module owning `item`.
    pub fn command_item(&mut self, item: &str, state: OnOff, cache: &CommandCache) -> Option<Publication> {
        self.modules.iter_mut()
            .find_map(|module| module.command_item(item, state, cache))
    }
}
