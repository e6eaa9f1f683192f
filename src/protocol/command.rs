use std::time::Duration;

use log::{error, trace};
use thiserror::Error;

use crate::cache::CommandCache;

use super::crc::append_crc;

/*
    Frames seen for a switch module at address 6C94:

    Request status, first channel group:
        CMD  : $10126C946CE5A0
        ACK  : $0512
        REPLY: $1C6C9400000000FF0000557CF8

    Request status, second channel group:
        CMD  : $10176C948715BB
        ACK  : $0517
        REPLY: $1C6C94000000FF0000FFCF4CC3

    Update status, first channel group:
        CMD  : $1E156C94000000FF0000FF60E149
        ACK  : $0515
        REPLY: $0EFF6C94009A

    Update status, second channel group:
        CMD  : $1E166C940000000000FFFF997295
        ACK  : $0516
        REPLY: $0EFF6C94009A
*/

/// Status request command prefix.
pub const STATUS_REQUEST_CMD: &str = "$10";

/// Generic acknowledgement prefix, followed by the group code of the acknowledged command.
pub const STATUS_REQUEST_ACK: &str = "$05";

/// Status response prefix, followed by the module address.
pub const STATUS_RESPONSE: &str = "$1C";

/// Status change (push) command prefix.
pub const STATUS_CHANGE_CMD: &str = "$1E";

/// Acknowledgement of a status change. Shares the prefix with [STATUS_REQUEST_ACK].
pub const STATUS_CHANGE_ACK: &str = "$05";

/// Reply sent by a module once a status change was applied.
pub const STATUS_CHANGE_REPLY: &str = "$0E";

/// How long a module gets to answer a status request.
pub const STATUS_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000);


#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no checksum cached for command {command}, run the analyzer first")]
pub struct ChecksumUnavailable {
    pub command: String,
}


/// A command body with its CRC appended, still missing the learned checksum.
///
/// Not sendable. Use [PartialCommand::complete] to obtain a [Command].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartialCommand {
    base: String,
    expected_response: Option<String>,
    timeout: Option<Duration>,
}

impl PartialCommand {
    /// Build `prefix + body + CRC(body)`.
    ///
    /// Returns `None` if `body` isn't valid hex.
    pub fn new(prefix: &str, body: &str) -> Option<Self> {
        let base = format!("{prefix}{}", append_crc(body)?);

        trace!("New command: {base}");

        Some(Self {
            base,
            expected_response: None,
            timeout: None
        })
    }

    /// Expect a response starting with `prefix` within `timeout`.
    pub fn expecting(mut self, prefix: impl Into<String>, timeout: Duration) -> Self {
        self.expected_response = Some(prefix.into());
        self.timeout = Some(timeout);
        self
    }

    /// The cache key: prefix, body and CRC.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Append the learned checksum for this command from `cache`.
    ///
    /// A miss is logged as an error: sending the command without the checksum
    /// would put a malformed frame on the shared bus.
    pub fn complete(self, cache: &CommandCache) -> Result<Command, ChecksumUnavailable> {
        trace!("Looking up checksum for command {} in cache", self.base);

        let Some(checksum) = cache.get(&self.base) else {
            error!("Cannot find checksum value in cache for command {}. Please run analyzer first.", self.base);
            return Err(ChecksumUnavailable { command: self.base })
        };

        Ok(Command {
            payload: format!("{}{checksum}", self.base),
            expected_response: self.expected_response,
            timeout: self.timeout,
        })
    }
}


/// A complete command, ready to be written to the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    payload: String,
    expected_response: Option<String>,
    timeout: Option<Duration>,
}

impl Command {
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Prefix of the frame that answers this command, if any.
    pub fn expected_response(&self) -> Option<&str> {
        self.expected_response.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether `frame` is the response this command waits for.
    pub fn is_response(&self, frame: &str) -> bool {
        match &self.expected_response {
            Some(prefix) => frame.starts_with(prefix.as_str()),
            None => false
        }
    }
}
