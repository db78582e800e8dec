// Length-delimited framing for the reliable channel.
//
// The reliable stream carries a 4-byte big-endian length prefix before each
// encoded message, so one `read_frame` always yields exactly one codec frame
// regardless of how the transport coalesces or splits the bytes. The
// unreliable channel does NOT use this module — there, one datagram is one
// frame by construction.
//
// `write_frame`/`read_frame` operate on raw bytes; `codec.rs` handles the
// message encoding separately.

use std::io::{self, Read, Write};

/// Maximum allowed frame size. Relay messages are small — event payloads are
/// the largest expected, and 64 KB is generous headroom. Caps allocation from
/// a corrupt or hostile length prefix.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024;

/// Write one frame: 4-byte big-endian length, then the encoded message.
pub fn write_frame<W: Write>(writer: &mut W, frame: &[u8]) -> io::Result<()> {
    let len = frame.len();
    if len > MAX_FRAME_SIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame too large: {len} bytes (max {MAX_FRAME_SIZE})"),
        ));
    }
    #[expect(clippy::cast_possible_truncation)]
    let len_bytes = (len as u32).to_be_bytes();
    writer.write_all(&len_bytes)?;
    writer.write_all(frame)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame: 4-byte big-endian length, then that many payload bytes.
///
/// Returns `UnexpectedEof` when the stream closes before or during a frame,
/// and `InvalidData` when the length exceeds `MAX_FRAME_SIZE`.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes (max {MAX_FRAME_SIZE})"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}
