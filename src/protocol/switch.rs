use const_format::concatcp;
use strum_macros::{Display, EnumString};

use super::command::STATUS_REQUEST_ACK;

/// Channel is switched on.
pub const HIGH_BYTE: &str = "FF";
/// Channel is switched off.
pub const LOW_BYTE: &str = "00";

/// Number of channels in a channel group.
pub const GROUP_SIZE: usize = 6;

/// Offset of the first channel state field in a status response,
/// after `$1C`, the module address and one leading byte.
const STATE_FIELDS_OFFSET: usize = 9;

const STATUS_REQUEST_GROUP_1: &str = "12";
const STATUS_REQUEST_GROUP_2: &str = "17";

const STATUS_CHANGE_GROUP_1: &str = "15";
const STATUS_CHANGE_GROUP_2: &str = "16";


#[derive(Display, EnumString, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[strum(ascii_case_insensitive)]
pub enum OnOff {
    #[strum(serialize = "ON")]
    On,
    #[default]
    #[strum(serialize = "OFF")]
    Off,
}

impl OnOff {
    /// Decode a 2 character state field. Anything but [LOW_BYTE] is on.
    pub fn from_field(field: &str) -> Self {
        if field == LOW_BYTE { Self::Off } else { Self::On }
    }

    pub fn as_field(self) -> &'static str {
        match self {
            OnOff::On => HIGH_BYTE,
            OnOff::Off => LOW_BYTE,
        }
    }
}


/// Channel group of a switch module.
///
/// Large switch modules expose channels 1-6 as the first group and 7-12 as the second.
/// Compact modules only have the first group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Group {
    First,
    Second
}

impl Group {
    /// Group a channel number (1-12) belongs to.
    pub fn of_channel(channel: u8) -> Self {
        if channel > GROUP_SIZE as u8 { Self::Second } else { Self::First }
    }

    pub fn number(self) -> u8 {
        match self {
            Group::First => 1,
            Group::Second => 2,
        }
    }

    /// Code identifying this group in status requests (and their ACKs).
    pub fn request_code(self) -> &'static str {
        match self {
            Group::First => STATUS_REQUEST_GROUP_1,
            Group::Second => STATUS_REQUEST_GROUP_2,
        }
    }

    /// Code identifying this group in status change commands.
    pub fn change_code(self) -> &'static str {
        match self {
            Group::First => STATUS_CHANGE_GROUP_1,
            Group::Second => STATUS_CHANGE_GROUP_2,
        }
    }

    /// ACK frame prefix for a status request to this group.
    pub fn request_ack(self) -> &'static str {
        const ACK_GROUP_1: &str = concatcp!(STATUS_REQUEST_ACK, STATUS_REQUEST_GROUP_1);
        const ACK_GROUP_2: &str = concatcp!(STATUS_REQUEST_ACK, STATUS_REQUEST_GROUP_2);

        match self {
            Group::First => ACK_GROUP_1,
            Group::Second => ACK_GROUP_2,
        }
    }
}

impl TryFrom<u8> for Group {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::First),
            2 => Ok(Self::Second),
            other => Err(other)
        }
    }
}


/// Encode the six channel states as they appear in a status change command.
pub fn encode_states(states: &[OnOff; GROUP_SIZE]) -> String {
    states.iter().map(|state| state.as_field()).collect()
}

/// Decode the six channel state fields of a status response frame.
///
/// Returns `None` if the frame is too short to contain them.
pub fn decode_states(frame: &str) -> Option<[OnOff; GROUP_SIZE]> {
    let mut states = [OnOff::Off; GROUP_SIZE];

    for (i, state) in states.iter_mut().enumerate() {
        let start = STATE_FIELDS_OFFSET + i * 2;
        *state = OnOff::from_field(frame.get(start..start + 2)?);
    }

    Some(states)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{crc::append_crc, command::STATUS_RESPONSE};

    use OnOff::*;

    #[test]
    fn test_decode_captured_responses() {
        assert_eq!(decode_states("$1C6C9400000000FF0000557CF8"), Some([Off, Off, Off, On, Off, Off]));
        assert_eq!(decode_states("$1C6C94000000FF0000FFCF4CC3"), Some([Off, Off, On, Off, Off, On]));
    }

    #[test]
    fn test_decode_short_frame() {
        assert_eq!(decode_states("$1C6C9400000000FF00"), None);
        assert_eq!(decode_states("$1C6C94"), None);
    }

    #[test]
    fn test_any_non_low_field_is_on() {
        assert_eq!(OnOff::from_field("01"), On);
        assert_eq!(OnOff::from_field("FF"), On);
        assert_eq!(OnOff::from_field("00"), Off);
    }

    #[test]
    fn test_states_survive_encode_and_response() {
        let states = [On, Off, On, Off, On, Off];
        let fields = encode_states(&states);
        assert_eq!(fields, "FF00FF00FF00");

        // a status response carrying the pushed states
        let body = append_crc(&format!("6C9400{fields}")).unwrap();
        let frame = format!("{STATUS_RESPONSE}{body}F8");

        assert_eq!(decode_states(&frame), Some(states));
    }

    #[test]
    fn test_on_off_strings() {
        assert_eq!("on".parse::<OnOff>(), Ok(On));
        assert_eq!("OFF".parse::<OnOff>(), Ok(Off));
        assert!("dim".parse::<OnOff>().is_err());
        assert_eq!(On.to_string(), "ON");
    }

    #[test]
    fn test_group_codes() {
        assert_eq!(Group::First.request_ack(), "$0512");
        assert_eq!(Group::Second.request_ack(), "$0517");
        assert_eq!(Group::Second.change_code(), "16");
        assert_eq!(Group::of_channel(6), Group::First);
        assert_eq!(Group::of_channel(7), Group::Second);
        assert_eq!(Group::try_from(3), Err(3));
    }
}
