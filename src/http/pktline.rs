//! Git packet-line framing for the ref advertisement.
//!
//! Smart-HTTP clients expect the `info/refs` body to open with a pkt-line
//! announcing the service, then a flush packet, then the raw
//! `--advertise-refs` output:
//!
//! ```text
//! 001e# service=git-upload-pack\n0000<raw advertisement>
//! ```
//!
//! Each packet line is prefixed with a 4-hex-digit length that includes the
//! prefix itself; `0000` is the flush packet.

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Flush packet, marking the end of the announcement section.
pub const FLUSH_PKT: &[u8] = b"0000";

/// Encode a byte slice as a Git packet-line (4-hex-digit length prefix +
/// data). The length includes the 4 prefix bytes themselves; callers include
/// any trailing newline in `data` themselves.
pub fn encode_pkt_line(data: &[u8]) -> Vec<u8> {
    let total_len = data.len() + 4;
    assert!(
        total_len <= 0xFFFF,
        "packet-line data too large ({total_len} bytes)"
    );
    let mut buf = Vec::with_capacity(total_len);
    buf.extend_from_slice(format!("{total_len:04x}").as_bytes());
    buf.extend_from_slice(data);
    buf
}

/// The framed announcement that precedes raw `--advertise-refs` output:
/// `pkt-line("# service=<service>\n")` followed by a flush packet.
pub fn advertisement_prefix(service: &str) -> Vec<u8> {
    let mut buf = encode_pkt_line(format!("# service={service}\n").as_bytes());
    buf.extend_from_slice(FLUSH_PKT);
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
