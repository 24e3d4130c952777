use std::time::Instant;

/// Event classes with independent per-connection budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Location,
    Accept,
    Ping,
}

impl EventClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventClass::Location => "location",
            EventClass::Accept => "accept",
            EventClass::Ping => "ping",
        }
    }
}

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate_per_sec: u32) -> Self {
        let capacity = rate_per_sec.max(1) as f64;
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec: capacity,
            last_refill: Instant::now(),
        }
    }

    fn allow(&mut self, now: Instant) -> bool {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-connection token-bucket limiter. Owned by the connection's receive
/// loop, so no synchronization is needed.
pub struct ConnectionRateLimiter {
    location: TokenBucket,
    accept: TokenBucket,
    ping: TokenBucket,
}

impl ConnectionRateLimiter {
    pub fn new(location_per_sec: u32, accept_per_sec: u32, ping_per_sec: u32) -> Self {
        Self {
            location: TokenBucket::new(location_per_sec),
            accept: TokenBucket::new(accept_per_sec),
            ping: TokenBucket::new(ping_per_sec),
        }
    }

    pub fn allow(&mut self, class: EventClass) -> bool {
        self.allow_at(class, Instant::now())
    }

    fn allow_at(&mut self, class: EventClass, now: Instant) -> bool {
        match class {
            EventClass::Location => self.location.allow(now),
            EventClass::Accept => self.accept.allow(now),
            EventClass::Ping => self.ping.allow(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn burst_up_to_capacity_then_rejects() {
        let mut limiter = ConnectionRateLimiter::new(3, 1, 1);
        let now = Instant::now();

        assert!(limiter.allow_at(EventClass::Location, now));
        assert!(limiter.allow_at(EventClass::Location, now));
        assert!(limiter.allow_at(EventClass::Location, now));
        assert!(!limiter.allow_at(EventClass::Location, now));
    }

    #[test]
    fn refills_over_time() {
        let mut limiter = ConnectionRateLimiter::new(2, 1, 1);
        let start = Instant::now();

        assert!(limiter.allow_at(EventClass::Location, start));
        assert!(limiter.allow_at(EventClass::Location, start));
        assert!(!limiter.allow_at(EventClass::Location, start));

        let later = start + Duration::from_secs(1);
        assert!(limiter.allow_at(EventClass::Location, later));
    }

    #[test]
    fn classes_have_independent_budgets() {
        let mut limiter = ConnectionRateLimiter::new(1, 1, 1);
        let now = Instant::now();

        assert!(limiter.allow_at(EventClass::Location, now));
        assert!(!limiter.allow_at(EventClass::Location, now));
        assert!(limiter.allow_at(EventClass::Accept, now));
        assert!(limiter.allow_at(EventClass::Ping, now));
    }
}
