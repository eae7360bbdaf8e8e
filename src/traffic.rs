use std::sync::atomic::{AtomicU64, Ordering};

/// Per-listener traffic counters (bytes).
///
/// `rx` counts client-to-upstream bytes including replayed ones, `tx`
/// counts upstream-to-client bytes.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    rx_bytes: AtomicU64,
    tx_bytes: AtomicU64,
    sessions: AtomicU64,
}

impl TrafficCounters {
    pub fn add_rx(&self, n: u64) { self.rx_bytes.fetch_add(n, Ordering::Relaxed); }
    pub fn add_tx(&self, n: u64) { self.tx_bytes.fetch_add(n, Ordering::Relaxed); }
    pub fn add_session(&self) { self.sessions.fetch_add(1, Ordering::Relaxed); }
    pub fn rx(&self) -> u64 { self.rx_bytes.load(Ordering::Relaxed) }
    pub fn tx(&self) -> u64 { self.tx_bytes.load(Ordering::Relaxed) }
    pub fn sessions(&self) -> u64 { self.sessions.load(Ordering::Relaxed) }

    /// Snapshot as (sessions, rx, tx)
    pub fn get(&self) -> (u64, u64, u64) { (self.sessions(), self.rx(), self.tx()) }
}
