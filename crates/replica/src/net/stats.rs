/// Running counters a host can surface in its own diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkStats {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub datagrams_dropped: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub last_snapshot_bytes: usize,
    pub max_snapshot_bytes: usize,
}

impl NetworkStats {
    pub fn record_sent(&mut self, bytes: usize) {
        self.datagrams_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.datagrams_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub fn record_dropped(&mut self) {
        self.datagrams_dropped += 1;
    }

    pub fn record_snapshot(&mut self, bytes: usize) {
        self.last_snapshot_bytes = bytes;
        self.max_snapshot_bytes = self.max_snapshot_bytes.max(bytes);
    }
}
