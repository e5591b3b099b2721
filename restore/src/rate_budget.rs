use std::time::Duration;

/// Caps the cumulative size of retrievals that have been requested but not
/// yet fully downloaded.
///
/// The store takes about four hours to surface a retrieval and bills each
/// one, so the budget pre-schedules exactly enough bytes that the download
/// pipe is full, but not oversubscribed, by the time the oldest job lands:
/// `speed × latency`. It is a byte budget, not a job count.
#[derive(Debug)]
pub struct RateBudget {
    speed_bytes_per_sec: u64,
    retrieval_latency: Duration,
    in_flight_bytes: u64,
}

impl RateBudget {
    pub fn new(speed_bytes_per_sec: u64, retrieval_latency: Duration) -> Self {
        Self {
            speed_bytes_per_sec,
            retrieval_latency,
            in_flight_bytes: 0,
        }
    }

    pub fn max_in_flight_bytes(&self) -> u64 {
        self.speed_bytes_per_sec.saturating_mul(self.retrieval_latency.as_secs())
    }

    pub fn in_flight_bytes(&self) -> u64 {
        self.in_flight_bytes
    }

    /// Bytes still reservable under the ceiling.
    pub fn available_bytes(&self) -> u64 {
        self.max_in_flight_bytes().saturating_sub(self.in_flight_bytes)
    }

    /// Reserves `n` bytes if they fit under the ceiling. The caller initiates
    /// a retrieval only after a successful reserve.
    pub fn try_reserve(&mut self, n: u64) -> bool {
        if self.in_flight_bytes + n <= self.max_in_flight_bytes() {
            self.in_flight_bytes += n;
            true
        } else {
            false
        }
    }

    /// Unconditionally reserves `n` bytes. Used for the head part when
    /// nothing is pending: a budget smaller than a single part must not
    /// stall the run forever.
    pub fn force_reserve(&mut self, n: u64) {
        self.in_flight_bytes += n;
    }

    pub fn release(&mut self, n: u64) {
        self.in_flight_bytes = self.in_flight_bytes.saturating_sub(n);
    }

    pub fn speed_bytes_per_sec(&self) -> u64 {
        self.speed_bytes_per_sec
    }

    /// Resizes the budget; zero is ignored so a degenerate measurement can
    /// never wedge the pipeline.
    pub fn set_speed(&mut self, bytes_per_sec: u64) {
        if bytes_per_sec > 0 {
            self.speed_bytes_per_sec = bytes_per_sec;
        }
    }
}
