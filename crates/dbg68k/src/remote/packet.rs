//! RSP packet framing: `$<payload>#<checksum>`, bare `+`/`-`
//! acknowledgements, and `%Stop:` notifications.

use log::warn;

use super::error::GdbError;

/// Reply class of a packet, decided by its leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Payload is exactly `OK`.
    Ok,
    /// A bare `+` acknowledgement.
    Plus,
    /// A bare `-` negative acknowledgement.
    Minus,
    /// `S`/`T` stop reply.
    Stop,
    /// `W` process-exit reply.
    End,
    /// `E<hh>` error reply.
    Error,
    /// `F` frame-selection reply.
    Frame,
    /// `AS` segment-table packet.
    Segment,
    /// `O` console output.
    Output,
    /// `T…tframes…` trace-status reply.
    QtStatus,
    Unknown,
}

/// One unit from the wire: classification, payload, and whether it came
/// wrapped as a `%Stop:` notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub payload: String,
    pub notification: bool,
}

impl Packet {
    fn bare(kind: PacketKind) -> Packet {
        Packet {
            kind,
            payload: String::new(),
            notification: false,
        }
    }
}

/// Additive 8-bit checksum over the payload bytes, as two lowercase hex
/// digits.
pub fn checksum(payload: &str) -> String {
    let sum = payload
        .bytes()
        .fold(0u8, |acc, b| acc.wrapping_add(b));
    format!("{:02x}", sum)
}

/// Wrap a payload in `$…#cc` framing.
pub fn frame(payload: &str) -> String {
    format!("${}#{}", payload, checksum(payload))
}

/// Classify a payload by its leading bytes. Leftmost rule wins.
pub fn classify(payload: &str) -> PacketKind {
    if payload == "OK" {
        return PacketKind::Ok;
    }
    if payload.starts_with("AS") {
        return PacketKind::Segment;
    }
    let bytes = payload.as_bytes();
    if bytes.first() == Some(&b'E')
        && bytes.len() >= 3
        && bytes[1].is_ascii_hexdigit()
        && bytes[2].is_ascii_hexdigit()
    {
        return PacketKind::Error;
    }
    match bytes.first() {
        Some(b'F') => PacketKind::Frame,
        Some(b'W') => PacketKind::End,
        Some(b'O') => PacketKind::Output,
        Some(b'T') if payload.contains("tframes") => PacketKind::QtStatus,
        Some(b'S') => PacketKind::Stop,
        Some(b'T') if !payload.starts_with("Te") => PacketKind::Stop,
        _ => PacketKind::Unknown,
    }
}

/// Incremental parser over the inbound byte stream.
///
/// Accepts any interleaving of acknowledgements and framed packets, and
/// keeps a partial frame buffered until the rest arrives. Packets with a
/// bad checksum are logged and dropped; the request serialiser's timeout
/// covers the lost reply.
#[derive(Default)]
pub struct PacketParser {
    buf: Vec<u8>,
}

impl PacketParser {
    pub fn new() -> Self {
        PacketParser::default()
    }

    /// Feed freshly read bytes, returning every complete packet they
    /// finish.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Packet> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();

        loop {
            match self.buf.first() {
                None => break,
                Some(b'+') => {
                    self.buf.remove(0);
                    out.push(Packet::bare(PacketKind::Plus));
                }
                Some(b'-') => {
                    self.buf.remove(0);
                    out.push(Packet::bare(PacketKind::Minus));
                }
                Some(b'$') | Some(b'%') => match self.take_frame() {
                    Some(packet) => out.extend(packet),
                    None => break, // incomplete, wait for more bytes
                },
                Some(_) => {
                    // Noise between frames; resynchronise on the next
                    // frame or acknowledgement byte.
                    let skip = self
                        .buf
                        .iter()
                        .position(|b| matches!(b, b'$' | b'%' | b'+' | b'-'))
                        .unwrap_or(self.buf.len());
                    self.buf.drain(..skip);
                }
            }
        }
        out
    }

    /// Try to take one `$…#cc` / `%…#cc` frame off the front of the
    /// buffer. `None` means the frame is still incomplete; `Some(None)`
    /// collapses to an empty vec for a discarded bad-checksum frame.
    fn take_frame(&mut self) -> Option<Option<Packet>> {
        let hash = self.buf.iter().position(|&b| b == b'#')?;
        if self.buf.len() < hash + 3 {
            return None;
        }

        let frame: Vec<u8> = self.buf.drain(..hash + 3).collect();
        let payload_bytes = &frame[1..hash];
        let expected = String::from_utf8_lossy(&frame[hash + 1..hash + 3]).to_string();
        let payload = String::from_utf8_lossy(payload_bytes).to_string();

        let actual = checksum(&payload);
        if !actual.eq_ignore_ascii_case(&expected) {
            warn!(
                "discarding packet with bad checksum (got {}, computed {}): {:?}",
                expected, actual, payload
            );
            return Some(None);
        }

        let (payload, notification) = match payload.strip_prefix("Stop:") {
            Some(rest) if frame[0] == b'%' => (rest.to_string(), true),
            _ => (payload, false),
        };

        Some(Some(Packet {
            kind: classify(&payload),
            payload,
            notification,
        }))
    }
}

/// Decode a hex string into bytes.
pub fn decode_hex(hex: &str) -> Result<Vec<u8>, GdbError> {
    if hex.len() % 2 != 0 {
        return Err(GdbError::Protocol(format!(
            "odd-length hex payload: {:?}",
            hex
        )));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| GdbError::Protocol(format!("bad hex payload: {:?}", hex)))
        })
        .collect()
}

/// Encode bytes as lowercase hex.
pub fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
