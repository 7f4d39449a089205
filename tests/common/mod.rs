//! In-memory fixture builders shared by the integration tests

/// Build a PlayStation SEQ blob around the given event stream
pub fn build_seq(ppqn: u16, tempo: u32, stream: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"pQES");
    data.extend_from_slice(&1u32.to_be_bytes());
    data.extend_from_slice(&ppqn.to_be_bytes());
    data.extend_from_slice(&tempo.to_be_bytes()[1..]); // u24
    data.push(4); // rhythm numerator
    data.push(2); // denominator exponent
    data.extend_from_slice(stream);
    data
}

/// Build a Nintendo DS SSEQ blob around the given event stream
pub fn build_sseq(stream: &[u8]) -> Vec<u8> {
    let file_size = (0x1C + stream.len()) as u32;
    let mut data = Vec::new();
    data.extend_from_slice(b"SSEQ");
    data.extend_from_slice(&0xFEFFu16.to_le_bytes());
    data.extend_from_slice(&0x0100u16.to_le_bytes()); // version
    data.extend_from_slice(&file_size.to_le_bytes());
    data.extend_from_slice(&0x10u16.to_le_bytes()); // header size
    data.extend_from_slice(&1u16.to_le_bytes()); // block count
    data.extend_from_slice(b"DATA");
    data.extend_from_slice(&(file_size - 0x10).to_le_bytes());
    data.extend_from_slice(&0x1Cu32.to_le_bytes()); // data offset
    data.extend_from_slice(stream);
    data
}

/// The two-track reference fixture: each track plays one note of key 60,
/// velocity 100 and 48 ticks, then ends at tick 48
pub fn two_track_reference() -> Vec<u8> {
    let stream = [
        0xFE, 0x03, 0x00, // allocate tracks 0 and 1
        0x93, 1, 14, 0x00, 0x00, // open track 1 at data-relative offset 14
        0xC7, 1, // track 0: note-wait on
        60, 100, 48, // note
        0xFF, // end at tick 48
        0xC7, 1, // track 1: note-wait on
        60, 100, 48, // note
        0xFF, // end at tick 48
    ];
    build_sseq(&stream)
}
