//! Hybrid logical clock.
//!
//! A replica owns one [`Clock`] and stamps every operation it generates with
//! [`Clock::send`]. When it applies a remote operation it calls
//! [`Clock::recv`] so that its next timestamp sorts after everything it has
//! seen. Ordering is `(millis, counter, node)`.
//!
//! The relay never stamps messages itself; it only compares the timestamps
//! replicas produced with this clock.

use crate::constants::{MAX_COUNTER, MAX_DRIFT_MS};
use crate::error::ClockError;
use crate::timestamp::Timestamp;

#[derive(Debug, Clone)]
pub struct Clock {
    timestamp: Timestamp,
    max_drift: u64,
}

impl Clock {
    pub fn new(node: &str) -> Self {
        Self::from_timestamp(Timestamp::new(0, 0, node))
    }

    /// Resume from the last timestamp this replica issued.
    pub fn from_timestamp(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            max_drift: MAX_DRIFT_MS,
        }
    }

    pub fn with_max_drift(mut self, max_drift: u64) -> Self {
        self.max_drift = max_drift;
        self
    }

    /// Last timestamp issued or observed.
    pub fn timestamp(&self) -> &Timestamp {
        &self.timestamp
    }

    /// Stamp a locally generated operation.
    pub fn send(&mut self, now: u64) -> Result<Timestamp, ClockError> {
        let old_millis = self.timestamp.millis();
        let old_counter = self.timestamp.counter() as u32;

        let millis = old_millis.max(now);
        let counter = if millis == old_millis { old_counter + 1 } else { 0 };

        self.check_drift(millis, now)?;
        self.advance(millis, counter)
    }

    /// Merge a timestamp received from another replica.
    pub fn recv(&mut self, remote: &Timestamp, now: u64) -> Result<Timestamp, ClockError> {
        self.check_drift(remote.millis(), now)?;

        let old_millis = self.timestamp.millis();
        let old_counter = self.timestamp.counter() as u32;
        let remote_millis = remote.millis();
        let remote_counter = remote.counter() as u32;

        let millis = old_millis.max(now).max(remote_millis);
        let counter = if millis == old_millis && millis == remote_millis {
            old_counter.max(remote_counter) + 1
        } else if millis == old_millis {
            old_counter + 1
        } else if millis == remote_millis {
            remote_counter + 1
        } else {
            0
        };

        self.check_drift(millis, now)?;
        if remote.node() == self.timestamp.node() {
            return Err(ClockError::DuplicateNode(remote.node().to_string()));
        }
        self.advance(millis, counter)
    }

    fn check_drift(&self, millis: u64, now: u64) -> Result<(), ClockError> {
        if millis.saturating_sub(now) > self.max_drift {
            return Err(ClockError::Drift {
                millis,
                now,
                max_drift: self.max_drift,
            });
        }
        Ok(())
    }

    fn advance(&mut self, millis: u64, counter: u32) -> Result<Timestamp, ClockError> {
        if counter > MAX_COUNTER as u32 {
            return Err(ClockError::Overflow);
        }
        self.timestamp = Timestamp::new(millis, counter as u16, self.timestamp.node());
        Ok(self.timestamp.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    #[test]
    fn test_send_with_monotonic_clock() {
        let mut clock = Clock::new("1");
        assert_eq!(
            clock.send(10).unwrap(),
            ts("1970-01-01T00:00:00.010Z-0000-0000000000000001")
        );
        assert_eq!(
            clock.send(11).unwrap(),
            ts("1970-01-01T00:00:00.011Z-0000-0000000000000001")
        );
    }

    #[test]
    fn test_send_with_stuttering_clock() {
        let mut clock = Clock::new("1");
        assert_eq!(clock.send(20).unwrap().counter(), 0);
        assert_eq!(
            clock.send(20).unwrap(),
            ts("1970-01-01T00:00:00.020Z-0001-0000000000000001")
        );
        assert_eq!(clock.send(20).unwrap().counter(), 2);
        assert_eq!(
            clock.send(21).unwrap(),
            ts("1970-01-01T00:00:00.021Z-0000-0000000000000001")
        );
    }

    #[test]
    fn test_send_with_regressing_clock() {
        let mut clock = Clock::new("1");
        clock.send(30).unwrap();
        assert_eq!(
            clock.send(29).unwrap(),
            ts("1970-01-01T00:00:00.030Z-0001-0000000000000001")
        );
        assert_eq!(
            clock.send(31).unwrap(),
            ts("1970-01-01T00:00:00.031Z-0000-0000000000000001")
        );
    }

    #[test]
    fn test_send_counter_overflow() {
        let mut clock = Clock::new("1");
        for _ in 0..=MAX_COUNTER as u32 {
            clock.send(40).unwrap();
        }
        assert_eq!(clock.send(40), Err(ClockError::Overflow));
    }

    #[test]
    fn test_send_after_drifted_state() {
        let mut clock =
            Clock::from_timestamp(Timestamp::new(MAX_DRIFT_MS + 1_000, 0, "1"));
        assert!(matches!(clock.send(500), Err(ClockError::Drift { .. })));
    }

    #[test]
    fn test_recv_with_global_monotonic_clock() {
        let mut clock = Clock::new("1");
        let out = clock
            .recv(&ts("1970-01-01T00:00:00.051Z-0000-0000000000000002"), 52)
            .unwrap();
        assert_eq!(out, ts("1970-01-01T00:00:00.052Z-0000-0000000000000001"));
    }

    #[test]
    fn test_recv_with_global_stuttering_clock() {
        let mut clock = Clock::new("1");
        let steps = [
            ("1970-01-01T00:00:00.062Z-0000-0000000000000002", 61, "1970-01-01T00:00:00.062Z-0001-0000000000000001"),
            ("1970-01-01T00:00:00.062Z-0001-0000000000000002", 62, "1970-01-01T00:00:00.062Z-0002-0000000000000001"),
            ("1970-01-01T00:00:00.062Z-0002-0000000000000002", 62, "1970-01-01T00:00:00.062Z-0003-0000000000000001"),
            ("1970-01-01T00:00:00.062Z-0004-0000000000000002", 63, "1970-01-01T00:00:00.063Z-0000-0000000000000001"),
        ];
        for (remote, now, expected) in steps {
            assert_eq!(clock.recv(&ts(remote), now).unwrap(), ts(expected));
        }
    }

    #[test]
    fn test_recv_with_remote_regressing_clock() {
        let mut clock = Clock::new("1");
        let steps = [
            ("1970-01-01T00:00:00.103Z-0000-0000000000000002", 101, "1970-01-01T00:00:00.103Z-0001-0000000000000001"),
            ("1970-01-01T00:00:00.102Z-0000-0000000000000002", 102, "1970-01-01T00:00:00.103Z-0002-0000000000000001"),
            ("1970-01-01T00:00:00.101Z-0000-0000000000000002", 103, "1970-01-01T00:00:00.103Z-0003-0000000000000001"),
        ];
        for (remote, now, expected) in steps {
            assert_eq!(clock.recv(&ts(remote), now).unwrap(), ts(expected));
        }
    }

    #[test]
    fn test_recv_rejects_drift() {
        let mut clock = Clock::new("1");
        let future = ts("1980-01-01T00:00:00.101Z-0000-0000000000000002");
        assert!(matches!(clock.recv(&future, 0), Err(ClockError::Drift { .. })));
        // state untouched
        assert_eq!(clock.timestamp(), &Timestamp::new(0, 0, "1"));
    }

    #[test]
    fn test_recv_rejects_own_node() {
        let mut clock = Clock::new("1");
        let own = ts("1970-01-01T00:00:00.001Z-0000-0000000000000001");
        assert!(matches!(clock.recv(&own, 5), Err(ClockError::DuplicateNode(_))));
    }
}
