//! ADB wire packets.
//!
//! Every message on an ADB transport is a 24-byte header followed by an
//! optional payload. All header fields are little-endian u32s:
//!
//! ```text
//! offset 0  command
//! offset 4  arg0
//! offset 8  arg1
//! offset 12 payload length
//! offset 16 payload checksum (zero when the negotiated version skips it)
//! offset 20 magic = command ^ 0xFFFFFFFF
//! ```
//!
//! The checksum is the wrapping byte sum adbd computes, not a CRC. Whether it
//! is emitted and enforced depends on the negotiated protocol version.

use bytes::Bytes;

use crate::error::WireError;

/// Size of the fixed packet header in bytes.
pub const HEADER_LEN: usize = 24;

/// Protocol version this host speaks.
pub const VERSION: u32 = 0x0100_0001;

/// Oldest version we will negotiate down to.
pub const VERSION_MIN: u32 = 0x0100_0000;

/// First version that drops the per-payload checksum.
pub const VERSION_SKIP_CHECKSUM: u32 = 0x0100_0001;

/// Maximum payload size this host advertises in its `CNXN`.
pub const MAX_PAYLOAD: usize = 256 * 1024;

/// Every ADB peer must accept payloads at least this large.
pub const MAX_PAYLOAD_FLOOR: usize = 4096;

/// Hard cap on any payload regardless of negotiation. Bounds the allocation a
/// transport makes for an inbound packet before the handshake has settled.
pub const MAX_PAYLOAD_CEILING: usize = 1024 * 1024;

/// Packet commands, the four ASCII tag bytes read as a little-endian u32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    /// `CNXN` - connection banner exchange.
    Connect = 0x4E58_4E43,
    /// `AUTH` - token challenge, signature, or public key offer.
    Auth = 0x4854_5541,
    /// `OPEN` - peer asks to open a logical socket for a service.
    Open = 0x4E45_504F,
    /// `OKAY` - socket ready / write acknowledged.
    Okay = 0x5941_4B4F,
    /// `CLSE` - half of the two-phase socket close.
    Close = 0x4553_4C43,
    /// `WRTE` - payload bytes for a logical socket.
    Write = 0x4554_5257,
    /// `SYNC` - historical keepalive, ignored.
    Sync = 0x434E_5953,
}

impl Command {
    /// Decode a wire tag. Returns `None` for tags this engine does not know.
    pub const fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            0x4E58_4E43 => Some(Self::Connect),
            0x4854_5541 => Some(Self::Auth),
            0x4E45_504F => Some(Self::Open),
            0x5941_4B4F => Some(Self::Okay),
            0x4553_4C43 => Some(Self::Close),
            0x4554_5257 => Some(Self::Write),
            0x434E_5953 => Some(Self::Sync),
            _ => None,
        }
    }

    /// The tag as it appears on the wire.
    pub const fn as_wire(self) -> u32 {
        self as u32
    }

    /// The four ASCII characters of the tag.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Connect => "CNXN",
            Self::Auth => "AUTH",
            Self::Open => "OPEN",
            Self::Okay => "OKAY",
            Self::Close => "CLSE",
            Self::Write => "WRTE",
            Self::Sync => "SYNC",
        }
    }
}

impl core::fmt::Display for Command {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.tag())
    }
}

/// An owned ADB packet.
///
/// `checksum` holds the wire value: for inbound packets, whatever the peer
/// sent; for outbound packets, whatever [`Packet::with_payload`] stamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub command: Command,
    pub arg0: u32,
    pub arg1: u32,
    pub checksum: u32,
    pub payload: Bytes,
}

impl Packet {
    /// A payload-less packet (`OKAY`, `CLSE`, ...).
    pub fn new(command: Command, arg0: u32, arg1: u32) -> Self {
        Self {
            command,
            arg0,
            arg1,
            checksum: 0,
            payload: Bytes::new(),
        }
    }

    /// A packet carrying `payload`. When `checksummed` the legacy byte-sum is
    /// stamped into the header, otherwise the field is zero.
    pub fn with_payload(
        command: Command,
        arg0: u32,
        arg1: u32,
        payload: Bytes,
        checksummed: bool,
    ) -> Self {
        let checksum = if checksummed {
            Self::payload_checksum(&payload)
        } else {
            0
        };
        Self {
            command,
            arg0,
            arg1,
            checksum,
            payload,
        }
    }

    /// The legacy ADB payload checksum: the wrapping sum of all payload bytes.
    pub fn payload_checksum(payload: &[u8]) -> u32 {
        payload
            .iter()
            .fold(0u32, |sum, &b| sum.wrapping_add(u32::from(b)))
    }

    /// Whether the stored checksum matches the payload.
    pub fn checksum_matches(&self) -> bool {
        self.checksum == Self::payload_checksum(&self.payload)
    }

    /// Encode the 24-byte header. The payload follows it on the wire,
    /// unmodified.
    pub fn encode_header(&self) -> [u8; HEADER_LEN] {
        let command = self.command.as_wire();
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&command.to_le_bytes());
        header[4..8].copy_from_slice(&self.arg0.to_le_bytes());
        header[8..12].copy_from_slice(&self.arg1.to_le_bytes());
        header[12..16].copy_from_slice(&(self.payload.len() as u32).to_le_bytes());
        header[16..20].copy_from_slice(&self.checksum.to_le_bytes());
        header[20..24].copy_from_slice(&(command ^ 0xFFFF_FFFF).to_le_bytes());
        header
    }
}

/// A decoded packet header. The transport reads `payload_len` more bytes to
/// complete the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub command: Command,
    pub arg0: u32,
    pub arg1: u32,
    pub payload_len: u32,
    pub checksum: u32,
}

impl PacketHeader {
    /// Decode a header, validating the magic.
    ///
    /// A header whose magic does not complement its command tag is rejected
    /// with [`WireError::BadMagic`]; a magic-consistent but unknown tag is
    /// [`WireError::UnknownCommand`], which the session escalates to a fatal
    /// protocol violation.
    pub fn decode(header: &[u8; HEADER_LEN]) -> Result<Self, WireError> {
        let word = |at: usize| u32::from_le_bytes(header[at..at + 4].try_into().unwrap());
        let raw_command = word(0);
        let magic = word(20);
        if raw_command ^ magic != 0xFFFF_FFFF {
            return Err(WireError::BadMagic {
                command: raw_command,
                magic,
            });
        }
        let command = Command::from_wire(raw_command).ok_or(WireError::UnknownCommand(raw_command))?;
        Ok(Self {
            command,
            arg0: word(4),
            arg1: word(8),
            payload_len: word(12),
            checksum: word(16),
        })
    }

    /// Attach a payload, yielding the full packet.
    pub fn into_packet(self, payload: Bytes) -> Packet {
        debug_assert_eq!(payload.len(), self.payload_len as usize);
        Packet {
            command: self.command,
            arg0: self.arg0,
            arg1: self.arg1,
            checksum: self.checksum,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_tags_match_wire_values() {
        for command in [
            Command::Connect,
            Command::Auth,
            Command::Open,
            Command::Okay,
            Command::Close,
            Command::Write,
            Command::Sync,
        ] {
            let expected = u32::from_le_bytes(command.tag().as_bytes().try_into().unwrap());
            assert_eq!(command.as_wire(), expected);
            assert_eq!(Command::from_wire(expected), Some(command));
        }
    }

    #[test]
    fn header_roundtrip() {
        let packet = Packet::with_payload(
            Command::Write,
            1,
            7,
            Bytes::from_static(b"hello"),
            true,
        );
        let header = PacketHeader::decode(&packet.encode_header()).unwrap();
        assert_eq!(header.command, Command::Write);
        assert_eq!(header.arg0, 1);
        assert_eq!(header.arg1, 7);
        assert_eq!(header.payload_len, 5);
        assert_eq!(header.checksum, Packet::payload_checksum(b"hello"));
    }

    #[test]
    fn magic_complements_command() {
        let packet = Packet::new(Command::Okay, 3, 4);
        let header = packet.encode_header();
        let command = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let magic = u32::from_le_bytes(header[20..24].try_into().unwrap());
        assert_eq!(command ^ magic, 0xFFFF_FFFF);
    }

    #[test]
    fn corrupted_magic_is_rejected() {
        let packet = Packet::new(Command::Okay, 0, 0);
        let mut header = packet.encode_header();
        header[20] ^= 0x01;
        assert!(matches!(
            PacketHeader::decode(&header),
            Err(WireError::BadMagic { .. })
        ));
    }

    #[test]
    fn unknown_tag_with_valid_magic() {
        let raw = 0x5858_5858u32; // "XXXX"
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&raw.to_le_bytes());
        header[20..24].copy_from_slice(&(raw ^ 0xFFFF_FFFF).to_le_bytes());
        assert_eq!(
            PacketHeader::decode(&header),
            Err(WireError::UnknownCommand(raw))
        );
    }

    #[test]
    fn checksum_is_byte_sum() {
        assert_eq!(Packet::payload_checksum(b""), 0);
        assert_eq!(Packet::payload_checksum(b"\x01\x02\x03"), 6);
        assert_eq!(Packet::payload_checksum(&[0xFF; 4]), 0x3FC);
    }

    #[test]
    fn unchecksummed_payload_stamps_zero() {
        let packet =
            Packet::with_payload(Command::Write, 1, 2, Bytes::from_static(b"data"), false);
        assert_eq!(packet.checksum, 0);
    }
}
