//! Controller command set.

use crate::protocol::framer::LINE_TERMINATOR;
use std::fmt;

/// One single-character controller command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// `s`: report both sensor channels as `<v1>,<v2>`
    ReadSensor,
    /// `b`: energise the magnet
    MagnetOn,
    /// `m`: release the magnet
    MagnetOff,
    /// `c`: switch the AC supply on
    AcOn,
    /// `d`: switch the AC supply off
    AcOff,
}

impl Command {
    /// Character sent on the wire.
    pub const fn code(self) -> char {
        match self {
            Command::ReadSensor => 's',
            Command::MagnetOn => 'b',
            Command::MagnetOff => 'm',
            Command::AcOn => 'c',
            Command::AcOff => 'd',
        }
    }

    /// Whether the caller waits for a reply. Actuator commands only need the
    /// write to be accepted.
    pub const fn expects_reply(self) -> bool {
        matches!(self, Command::ReadSensor)
    }

    /// Bytes written to the transport: the code followed by the terminator.
    pub fn wire(self) -> [u8; 2] {
        [self.code() as u8, LINE_TERMINATOR]
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::ReadSensor => "read sensor",
            Command::MagnetOn => "magnet on",
            Command::MagnetOff => "magnet off",
            Command::AcOn => "AC on",
            Command::AcOff => "AC off",
        };
        write!(f, "{} ('{}')", name, self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes() {
        assert_eq!(Command::ReadSensor.wire(), *b"s\n");
        assert_eq!(Command::MagnetOn.wire(), *b"b\n");
        assert_eq!(Command::MagnetOff.wire(), *b"m\n");
        assert_eq!(Command::AcOn.wire(), *b"c\n");
        assert_eq!(Command::AcOff.wire(), *b"d\n");
    }

    #[test]
    fn display_names_the_code() {
        assert_eq!(Command::ReadSensor.to_string(), "read sensor ('s')");
        assert_eq!(Command::AcOff.to_string(), "AC off ('d')");
    }

    #[test]
    fn only_sensor_read_waits_for_reply() {
        let waiting: Vec<_> = [
            Command::ReadSensor,
            Command::MagnetOn,
            Command::MagnetOff,
            Command::AcOn,
            Command::AcOff,
        ]
        .into_iter()
        .filter(|cmd| cmd.expects_reply())
        .collect();
        assert_eq!(waiting, vec![Command::ReadSensor]);
    }
}
