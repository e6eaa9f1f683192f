use std::path::PathBuf;

use anyhow::{Result, bail};
use async_broadcast::RecvError;
use clap::Parser;
use colored::Colorize;
use futures::StreamExt;
use log::{info, warn};
use nikobus::{
    binding::{Binding, PublishOutcome},
    bus::EventHub,
    config::{Port, load_cache, load_items},
    protocol::{command::{Command, STATUS_REQUEST_TIMEOUT}, switch::OnOff},
};
use tokio::{io::{AsyncBufReadExt, BufReader}, select, time::{self, Duration, Instant}};
use url::Url;


/// Drive the switch modules on a Nikobus.
///
/// Polls every configured channel group for its state, prints state changes
/// and switches channels on request. Type `ITEM ON` or `ITEM OFF` on stdin
/// to switch a channel.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL of the port to connect to
    ///
    /// either serial:///device/path or tcp+raw://host:port URLs supported
    port: Url,

    /// Item bindings, one `NAME = ADDRESS:CHANNEL` per line
    #[arg(long)]
    items: PathBuf,

    /// Learned checksums, one `COMMAND=CHECKSUM` per line
    #[arg(long)]
    cache: PathBuf,

    /// Seconds between two status requests
    #[arg(long, default_value_t = 2)]
    interval: u64,
}


/// A status request waiting for its response.
struct Pending {
    module: String,
    command: Command,
    deadline: Instant,
}


#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let cache = load_cache(&args.cache)?;
    let modules = load_items(&args.items)?;

    if modules.is_empty() {
        bail!("no channel groups configured in {}", args.items.display());
    }

    let (port_tx, mut port_rx) = Port::open(&args.port).await?.framed().split();

    let hub = EventHub::new(64);

    tokio::spawn({
        let mut updates = hub.subscribe();

        async move {
            loop {
                match updates.recv().await {
                    Ok(change) => {
                        let state = match change.state {
                            OnOff::On => change.state.to_string().bright_green(),
                            OnOff::Off => change.state.to_string().bright_red(),
                        };
                        println!("{} {state}", change.item.bold());
                    },
                    Err(RecvError::Overflowed(n)) => warn!("Missed {n} state updates"),
                    Err(RecvError::Closed) => break
                }
            }
        }
    });

    let mut binding = Binding::new(cache, modules, port_tx, hub);
    let names = binding.modules().names();

    let mut poll_ticker = time::interval(Duration::from_secs(args.interval.max(1)));
    let mut next_module = names.iter().cycle();
    let mut pending: Option<Pending> = None;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    info!("Polling {} channel groups: {}", names.len(), names.join(", "));

    loop {
        let deadline = pending.as_ref().map(|pending| pending.deadline);

        select! {
            frame = port_rx.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(err)) => return Err(err.into()),
                    None => bail!("port closed"),
                };

                if pending.as_ref().map_or(false, |pending| pending.command.is_response(&frame)) {
                    pending = None;
                }

                binding.process_frame(&frame);
            },

            _ = poll_ticker.tick() => {
                // one request on the bus at a time
                if pending.is_some() {
                    continue;
                }

                let Some(module) = next_module.next() else { continue };

                if let Some(command) = binding.request_status(module).await {
                    let timeout = command.timeout().unwrap_or(STATUS_REQUEST_TIMEOUT);

                    pending = Some(Pending {
                        module: module.clone(),
                        command,
                        deadline: Instant::now() + timeout
                    });
                }
            },

            _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(pending) = pending.take() {
                    warn!("Module {} did not answer {} in time", pending.module, pending.command.payload());
                }
            },

            line = stdin.next_line(), if stdin_open => {
                let line = match line? {
                    Some(line) => line,
                    None => {
                        stdin_open = false;
                        continue;
                    }
                };

                let mut words = line.split_whitespace();
                let (Some(item), Some(state), None) = (words.next(), words.next(), words.next()) else {
                    println!("usage: ITEM ON|OFF");
                    continue;
                };

                let Ok(state) = state.parse::<OnOff>() else {
                    println!("invalid state {state:?}, expected ON or OFF");
                    continue;
                };

                match binding.publish(item, state).await {
                    PublishOutcome::Sent => (),
                    PublishOutcome::Skipped(reason) => println!("{item} not switched: {reason:?}")
                }
            }
        }
    }
}
