//! Payload byte accounting.

/// Raw versus on-the-wire byte counts for one transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayloadStats {
    /// File bytes before compression
    pub raw_bytes: u64,
    /// Bytes actually carried by the connection
    pub wire_bytes: u64,
    /// Number of chunks
    pub chunks: u64,
}

impl PayloadStats {
    /// Record one chunk.
    pub fn add_chunk(&mut self, raw: u64, wire: u64) {
        self.raw_bytes += raw;
        self.wire_bytes += wire;
        self.chunks += 1;
    }

    /// Fraction of bytes saved (0.7 means 70% saved). Zero for empty or
    /// expanding transfers.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.raw_bytes == 0 || self.wire_bytes >= self.raw_bytes {
            0.0
        } else {
            1.0 - (self.wire_bytes as f64 / self.raw_bytes as f64)
        }
    }

    /// A string like "70% saved", or empty if nothing significant was saved.
    #[must_use]
    pub fn savings_display(&self) -> String {
        let ratio = self.ratio();
        if ratio > 0.01 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let percentage = (ratio * 100.0) as u32;
            format!("{percentage}% saved")
        } else {
            String::new()
        }
    }
}
