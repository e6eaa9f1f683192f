use std::{fs::File, io::{BufRead, BufReader}, path::Path, str::FromStr};

use anyhow::{Result, Context, bail};
use futures::{Sink, Stream};
use log::{info, warn};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_serial::{SerialStream, SerialPortBuilderExt};
use tokio_util::codec::Framed;
use url::Url;

use crate::{
    cache::CommandCache,
    module::{Module, Registry, switch::ChannelGroup},
    protocol::{address::{AddressError, ModuleAddress}, codec::NikobusCodec, command::Command, switch::Group},
};

/// Baud rate of the PC-Link serial interface (8N1).
const BAUD_RATE: u32 = 9600;


pub enum Port {
    Serial(SerialStream),
    TcpRaw(TcpStream)
}


/// A framed connection to the bus.
pub trait PortStream: Stream<Item = std::io::Result<String>> + Sink<Command, Error = std::io::Error> + Send + Unpin {}

impl<T> PortStream for T
where
    T: Stream<Item = std::io::Result<String>> + Sink<Command, Error = std::io::Error> + Send + Unpin,
{}


impl Port {
    pub async fn open(url: &Url) -> Result<Self> {
        match url.scheme() {
            "serial" => {
                let path = url.path();

                let port = tokio_serial::new(path, BAUD_RATE)
                    .data_bits(tokio_serial::DataBits::Eight)
                    .stop_bits(tokio_serial::StopBits::One)
                    .parity(tokio_serial::Parity::None)
                    .open_native_async()
                    .with_context(|| format!("failed to open serial port {path}"))
                    ?;

                Ok(Self::Serial(port))
            },
            "tcp+raw" => {
                let host = url.host_str()
                    .with_context(|| format!("tcp+raw requires a host to be specified in the url: {url}"))?;

                let port = url.port()
                    .with_context(|| format!("tcp+raw requires a port number to be specified in the url: {url}"))?;

                let stream = TcpStream::connect((host, port)).await
                    .with_context(|| format!("failed to open tcp+raw connection to: {url}"))?;

                stream.set_nodelay(true)?;

                Ok(Self::TcpRaw(stream))
            },
            other => {
                bail!("url scheme {other} not supported");
            }
        }
    }

    pub fn framed(self) -> Box<dyn PortStream> {
        match self {
            Port::Serial(port) => Box::new(Framed::new(port, NikobusCodec::new())),
            Port::TcpRaw(stream) => Box::new(Framed::new(stream, NikobusCodec::new())),
        }
    }
}


#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("line {line}: expected NAME = ADDRESS:CHANNEL, got {content:?}")]
    Malformed {
        line: usize,
        content: String
    },
    #[error("line {line}: {source}")]
    InvalidAddress {
        line: usize,
        source: AddressError
    },
    #[error("line {line}: invalid channel number {channel:?}")]
    InvalidChannel {
        line: usize,
        channel: String
    },
}


/// An item bound to a switch module channel, e.g. `kitchen = 6C94:4`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemBinding {
    pub name: String,
    pub address: ModuleAddress,
    /// Channel number, 1-12.
    pub channel: u8,
}

impl ItemBinding {
    fn parse(line: usize, content: &str) -> Result<Self, ConfigError> {
        let malformed = || ConfigError::Malformed { line, content: content.to_string() };

        let (name, target) = content.split_once('=').ok_or_else(malformed)?;
        let (address, channel) = target.split_once(':').ok_or_else(malformed)?;

        let name = name.trim();
        if name.is_empty() {
            return Err(malformed());
        }

        let address = ModuleAddress::from_str(address)
            .map_err(|source| ConfigError::InvalidAddress { line, source })?;

        let channel = channel.trim().parse()
            .map_err(|_| ConfigError::InvalidChannel { line, channel: channel.trim().to_string() })?;

        Ok(Self {
            name: name.to_string(),
            address,
            channel
        })
    }
}

/// Read item bindings, one per line. Blank lines and `#` comments are skipped.
pub fn read_items<R: BufRead>(reader: R) -> Result<Vec<ItemBinding>> {
    let mut items = vec![];

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let content = line.trim();

        if content.is_empty() || content.starts_with('#') {
            continue;
        }

        items.push(ItemBinding::parse(idx + 1, content)?);
    }

    Ok(items)
}

/// Build one channel group per module address and group used by `items`.
///
/// Items bound to a channel outside 1-12 are left out.
pub fn build_registry(items: &[ItemBinding]) -> Registry {
    let mut groups: Vec<ChannelGroup> = vec![];

    for item in items {
        let group = Group::of_channel(item.channel);

        let existing = groups.iter().position(|g| g.address() == &item.address && g.group() == group);

        let mut created = None;
        let target = match existing {
            Some(idx) => &mut groups[idx],
            None => created.insert(ChannelGroup::new(item.address.clone(), group)),
        };

        if target.add_channel(item.name.as_str(), item.channel).is_none() {
            warn!("Ignoring item {}: channel {} is not in 1-12", item.name, item.channel);
            continue;
        }

        if let Some(created) = created {
            groups.push(created);
        }
    }

    let mut registry = Registry::new();
    for group in groups {
        registry.register(Box::new(group));
    }
    registry
}

pub fn load_items(path: &Path) -> Result<Registry> {
    let file = File::open(path)
        .with_context(|| format!("failed to open items file {}", path.display()))?;

    let items = read_items(BufReader::new(file))
        .with_context(|| format!("failed to read items file {}", path.display()))?;

    let registry = build_registry(&items);

    info!("Loaded {} items in {} channel groups from {}", items.len(), registry.len(), path.display());

    Ok(registry)
}

pub fn load_cache(path: &Path) -> Result<CommandCache> {
    let file = File::open(path)
        .with_context(|| format!("failed to open checksum cache {}", path.display()))?;

    let cache = CommandCache::read(BufReader::new(file))
        .with_context(|| format!("failed to read checksum cache {}", path.display()))?;

    info!("Loaded {} checksums from {}", cache.len(), path.display());

    Ok(cache)
}
