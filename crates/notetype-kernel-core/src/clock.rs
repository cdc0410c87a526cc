use time::OffsetDateTime;

/// Source of modification timestamps and note type ids.
pub trait Clock {
    fn now_secs(&self) -> i64;

    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> i64 {
        OffsetDateTime::now_utc().unix_timestamp()
    }

    fn now_millis(&self) -> i64 {
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        i64::try_from(millis).unwrap_or(i64::MAX)
    }
}

/// Clock pinned to one instant.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedClock {
    pub secs: i64,
}

impl Clock for FixedClock {
    fn now_secs(&self) -> i64 {
        self.secs
    }

    fn now_millis(&self) -> i64 {
        self.secs.saturating_mul(1000)
    }
}
