//! Staging buffer for formatted console output

use core::fmt;

/// Staging buffer size. Holds a dropped-records notice, the record header
/// and a full-length message.
pub const STAGING_SIZE: usize = 256;

/// Fixed-size output buffer.
///
/// Each emitting context owns its own: the atomic path keeps one on the
/// stack, a console worker keeps one for its lifetime. A context that loses
/// ownership mid-write therefore never shares bytes with the one that took
/// over.
pub struct StagingBuf {
    buf: [u8; STAGING_SIZE],
    len: usize,
    truncated: bool,
}

impl StagingBuf {
    /// Create empty buffer
    pub const fn new() -> Self {
        Self {
            buf: [0u8; STAGING_SIZE],
            len: 0,
            truncated: false,
        }
    }

    /// Clear buffer
    pub fn clear(&mut self) {
        self.len = 0;
        self.truncated = false;
    }

    /// Append bytes, dropping whatever does not fit
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let room = STAGING_SIZE - self.len;
        let n = bytes.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        if n < bytes.len() {
            self.truncated = true;
        }
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Get buffer as string slice
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(self.as_bytes()).unwrap_or("")
    }

    /// Get buffer length
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True if something was cut off since the last clear
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

impl Default for StagingBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Write for StagingBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_bytes(s.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;

    #[test]
    fn test_staging_write() {
        let mut buf = StagingBuf::new();
        write!(buf, "seq {}", 42).unwrap();
        assert_eq!(buf.as_str(), "seq 42");
        assert!(!buf.truncated());

        buf.clear();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_staging_truncates() {
        let mut buf = StagingBuf::new();
        buf.push_bytes(&[b'a'; STAGING_SIZE - 2]);
        buf.push_bytes(b"xyz");
        assert_eq!(buf.len(), STAGING_SIZE);
        assert!(buf.truncated());
        assert!(buf.as_str().ends_with("xy"));
    }
}
