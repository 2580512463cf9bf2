//! Logging helpers for binary data so receiver bytes stay readable on one log line.

/// Render up to `max` bytes as space-separated hex. Longer input is truncated with an
/// ellipsis and the count of omitted bytes, so a noisy stream cannot flood the log.
pub fn hex_snippet(bytes: &[u8], max: usize) -> String {
    use std::fmt::Write;
    let shown = bytes.len().min(max);
    let mut out = String::with_capacity(shown * 3 + 12);
    for (i, b) in bytes[..shown].iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(&mut out, "{:02x}", b);
    }
    if bytes.len() > shown {
        let _ = write!(&mut out, " … (+{})", bytes.len() - shown);
    }
    out
}
