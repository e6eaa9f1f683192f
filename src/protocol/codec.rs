use bytes::{Buf, BufMut, BytesMut};
use log::{trace, warn};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::command::Command;


/// Terminates every frame on the wire.
const FRAME_END: u8 = b'\r';

/// Start of a module command/response frame.
const COMMAND_START: u8 = b'$';

/// Start of a push button frame.
const BUTTON_START: u8 = b'#';

/// Longest frame we expect to see. Anything longer without a terminator is junk.
const MAX_FRAME_LEN: usize = 128;


#[derive(Error, Debug, PartialEq, Eq)]
enum FramingError {
    #[error("no frame start marker in {0:?}")]
    FrameStartNotFound(Vec<u8>),
    #[error("frame is not ASCII: {0:x?}")]
    NotAscii(Vec<u8>),
}


/// Line codec for the bus.
///
/// Frames are ASCII and terminated by a carriage return. Anything before the
/// first frame start marker in a line (echoed modem chatter, noise) is dropped.
#[derive(Debug, Default)]
pub struct NikobusCodec;

impl NikobusCodec {
    pub fn new() -> Self {
        Self
    }
}

fn parse_line(line: &[u8]) -> Result<Option<String>, FramingError> {
    let Some(last) = line.iter().rposition(|b| !b.is_ascii_whitespace()) else {
        return Ok(None);
    };
    let line = &line[..=last];

    let Some(start) = line.iter().position(|b| *b == COMMAND_START || *b == BUTTON_START) else {
        return Err(FramingError::FrameStartNotFound(line.to_vec()));
    };

    let frame = &line[start..];
    if !frame.is_ascii() {
        return Err(FramingError::NotAscii(frame.to_vec()));
    }

    Ok(Some(frame.iter().map(|b| *b as char).collect()))
}

impl Decoder for NikobusCodec {
    type Item = String;

    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(end_idx) = src.iter().position(|b| *b == FRAME_END) else {
                if src.len() > MAX_FRAME_LEN {
                    warn!("Discarding {} bytes without frame end: {:x?}", src.len(), &src[..]);
                    src.clear();
                }

                // need more data
                return Ok(None);
            };

            let line = src.split_to(end_idx);
            src.advance(1); // frame end

            match parse_line(&line) {
                Ok(Some(frame)) => {
                    trace!("Read frame: {frame}");
                    return Ok(Some(frame));
                }
                Ok(None) => continue,
                Err(err) => {
                    warn!("Skipping garbled line: {err}");
                    continue;
                }
            }
        }
    }
}

impl Encoder<Command> for NikobusCodec {
    type Error = std::io::Error;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = command.payload().as_bytes();

        trace!("Write frame: {}", command.payload());

        dst.reserve(payload.len() + 1);
        dst.put(payload);
        dst.put_u8(FRAME_END);

        Ok(())
    }
}
