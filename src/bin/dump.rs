use std::time::SystemTime;

use anyhow::Result;
use clap::Parser;
use colored::{ColoredString, Colorize};
use futures::StreamExt;
use nikobus::{
    config::Port,
    protocol::{command::*, switch::{decode_states, Group}},
};
use url::Url;


/// Print every frame seen on the bus.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL of the port to connect to
    ///
    /// either serial:///device/path or tcp+raw://host:port URLs supported
    port: Url,
}


#[derive(Clone, Copy)]
enum Kind {
    StatusRequest,
    StatusRequestAck,
    StatusResponse,
    StatusChange,
    StatusChangeAck,
    StatusChangeReply,
    Button,
    Unknown,
}

fn kind(frame: &str) -> Kind {
    let ack_code = frame.get(3..5);

    match frame.get(..3) {
        Some(STATUS_REQUEST_CMD) => Kind::StatusRequest,
        Some(STATUS_RESPONSE) => Kind::StatusResponse,
        Some(STATUS_CHANGE_CMD) => Kind::StatusChange,
        Some(STATUS_CHANGE_REPLY) => Kind::StatusChangeReply,
        Some(STATUS_REQUEST_ACK) if [Group::First, Group::Second].iter().any(|g| ack_code == Some(g.request_code())) => Kind::StatusRequestAck,
        Some(STATUS_CHANGE_ACK) if [Group::First, Group::Second].iter().any(|g| ack_code == Some(g.change_code())) => Kind::StatusChangeAck,
        _ if frame.starts_with("#N") => Kind::Button,
        _ => Kind::Unknown
    }
}

fn describe(kind: Kind, frame: &str) -> String {
    let address = frame.get(5..9).unwrap_or("????");

    match kind {
        Kind::StatusRequest => format!("Status Request       {address} group {}", group_of(frame.get(3..5))),
        Kind::StatusRequestAck => "Status Request ACK".to_string(),
        Kind::StatusResponse => {
            let address = frame.get(3..7).unwrap_or("????");
            match decode_states(frame) {
                Some(states) => format!("Status Response      {address} {states:?}"),
                None => format!("Status Response      {address} (truncated)"),
            }
        },
        Kind::StatusChange => format!("Status Change        {address} group {}", group_of(frame.get(3..5))),
        Kind::StatusChangeAck => "Status Change ACK".to_string(),
        Kind::StatusChangeReply => "Status Change Reply".to_string(),
        Kind::Button => format!("Button               {}", &frame[2..]),
        Kind::Unknown => "Unknown".to_string(),
    }
}

fn group_of(code: Option<&str>) -> &'static str {
    match code {
        Some(code) if code == Group::First.request_code() || code == Group::First.change_code() => "1",
        Some(code) if code == Group::Second.request_code() || code == Group::Second.change_code() => "2",
        _ => "?"
    }
}

fn coloured(kind: Kind, line: String) -> ColoredString {
    match kind {
        Kind::StatusRequest => line.on_purple().bright_white(),
        Kind::StatusRequestAck | Kind::StatusChangeAck => line.on_cyan().bright_white(),
        Kind::StatusResponse => line.on_green().bright_white(),
        Kind::StatusChange => line.on_magenta().bright_white(),
        Kind::StatusChangeReply => line.on_bright_green().bright_white(),
        Kind::Button => line.on_yellow().black(),
        Kind::Unknown => line.on_black()
    }
}

fn delta_ms(time: Option<SystemTime>) -> u128 {
    time.and_then(|time| time.elapsed().ok())
        .map_or(0, |elapsed| elapsed.as_millis())
}


#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let mut framed = Port::open(&args.port).await?.framed();

    let start_time = SystemTime::now();
    let mut last_frame_time: Option<SystemTime> = None;

    while let Some(frame) = framed.next().await {
        let frame = frame?;

        let start_delta_ms = delta_ms(Some(start_time));
        let last_frame_delta_ms = delta_ms(last_frame_time);

        let kind = kind(&frame);
        let line = format!("[{start_delta_ms:8}, {last_frame_delta_ms:8}] {frame: <30} {}", describe(kind, &frame));

        println!("{}", coloured(kind, line));

        last_frame_time = Some(SystemTime::now());
    }

    Ok(())
}
