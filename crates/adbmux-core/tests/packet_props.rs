//! Property tests for the packet codec.
//!
//! These validate the wire invariants across randomly generated payloads and
//! header fields rather than a handful of fixed vectors.

use adbmux_core::{Command, Packet, PacketHeader, WireError, HEADER_LEN};
use bytes::Bytes;
use proptest::prelude::*;

fn any_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        Just(Command::Connect),
        Just(Command::Auth),
        Just(Command::Open),
        Just(Command::Okay),
        Just(Command::Close),
        Just(Command::Write),
        Just(Command::Sync),
    ]
}

proptest! {
    // Any packet's header decodes back to the fields it was built from.
    #[test]
    fn header_roundtrip(
        command in any_command(),
        arg0 in any::<u32>(),
        arg1 in any::<u32>(),
        payload in prop::collection::vec(any::<u8>(), 0..4096),
    ) {
        let packet = Packet::with_payload(command, arg0, arg1, Bytes::from(payload.clone()), true);
        let header = PacketHeader::decode(&packet.encode_header()).unwrap();
        prop_assert_eq!(header.command, command);
        prop_assert_eq!(header.arg0, arg0);
        prop_assert_eq!(header.arg1, arg1);
        prop_assert_eq!(header.payload_len as usize, payload.len());
        prop_assert_eq!(header.checksum, Packet::payload_checksum(&payload));

        let decoded = header.into_packet(packet.payload.clone());
        prop_assert_eq!(decoded, packet);
    }

    // Every emitted header satisfies command ^ magic == 0xFFFFFFFF.
    #[test]
    fn magic_always_complements_command(
        command in any_command(),
        arg0 in any::<u32>(),
        arg1 in any::<u32>(),
    ) {
        let header = Packet::new(command, arg0, arg1).encode_header();
        let wire_command = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let magic = u32::from_le_bytes(header[20..24].try_into().unwrap());
        prop_assert_eq!(wire_command ^ magic, 0xFFFF_FFFF);
    }

    // Flipping any bit of the magic word makes decoding fail.
    #[test]
    fn corrupted_magic_never_decodes(
        command in any_command(),
        bit in 0usize..32,
    ) {
        let mut header = Packet::new(command, 0, 0).encode_header();
        header[20 + bit / 8] ^= 1 << (bit % 8);
        prop_assert!(
            matches!(
                PacketHeader::decode(&header),
                Err(WireError::BadMagic { .. })
            ),
            "expected BadMagic error"
        );
    }

    // The sum matches a direct reference computation.
    #[test]
    fn checksum_matches_reference(payload in prop::collection::vec(any::<u8>(), 0..4096)) {
        let mut reference: u32 = 0;
        for &b in &payload {
            reference = reference.wrapping_add(u32::from(b));
        }
        prop_assert_eq!(Packet::payload_checksum(&payload), reference);
    }

    // Unchecksummed packets always stamp zero, whatever the payload.
    #[test]
    fn unchecksummed_is_zero(payload in prop::collection::vec(any::<u8>(), 0..1024)) {
        let packet = Packet::with_payload(Command::Write, 1, 2, Bytes::from(payload), false);
        prop_assert_eq!(packet.checksum, 0);
        let header = packet.encode_header();
        prop_assert_eq!(&header[16..20], &[0u8; 4]);
    }
}

#[test]
fn header_is_exactly_24_bytes() {
    assert_eq!(HEADER_LEN, 24);
    let header = Packet::new(Command::Sync, 0, 0).encode_header();
    assert_eq!(header.len(), 24);
}
