//! Refresh scheduling inside a backend worker loop.
//!
//! Two independent cadences: how often the worker queries the venue for
//! fresh state, and how often it pushes a consolidated update to the client.
//! Decoupling the two smooths bursts of venue-side updates into a bounded
//! client-update rate. Login requests get their own, stricter throttle
//! because venues reject rapid repeated logins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// State categories a backend refreshes from the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    /// Account funds / balance.
    Account,
    /// Open positions.
    Positions,
    /// Bank transfer links.
    BankTransfers,
    /// Account registration data.
    Registration,
}

/// Poll priority: funds and positions first, reference data after.
const REFRESH_ORDER: [RefreshKind; 4] = [
    RefreshKind::Account,
    RefreshKind::Positions,
    RefreshKind::BankTransfers,
    RefreshKind::Registration,
];

/// Refresh request flags, settable from any thread.
///
/// Venue API callbacks run on their own thread in live backends, so the
/// flags are atomics rather than worker-local booleans.
#[derive(Debug, Default)]
pub struct RefreshFlags {
    account: AtomicBool,
    positions: AtomicBool,
    bank_transfers: AtomicBool,
    registration: AtomicBool,
    /// Session state changed since the last client push.
    changed: AtomicBool,
}

impl RefreshFlags {
    /// Request a refresh of one state category.
    pub fn request(&self, kind: RefreshKind) {
        self.slot(kind).store(true, Ordering::Release);
    }

    /// Request a refresh of every category (used right after login).
    pub fn request_all(&self) {
        for kind in REFRESH_ORDER {
            self.request(kind);
        }
    }

    /// Mark session state dirty so the next send deadline pushes an update.
    pub fn mark_changed(&self) {
        self.changed.store(true, Ordering::Release);
    }

    /// True if any category refresh is pending.
    pub fn any_pending(&self) -> bool {
        REFRESH_ORDER
            .iter()
            .any(|k| self.slot(*k).load(Ordering::Acquire))
    }

    fn slot(&self, kind: RefreshKind) -> &AtomicBool {
        match kind {
            RefreshKind::Account => &self.account,
            RefreshKind::Positions => &self.positions,
            RefreshKind::BankTransfers => &self.bank_transfers,
            RefreshKind::Registration => &self.registration,
        }
    }

    fn take(&self, kind: RefreshKind) -> bool {
        self.slot(kind).swap(false, Ordering::AcqRel)
    }

    fn take_changed(&self) -> bool {
        self.changed.swap(false, Ordering::AcqRel)
    }
}

/// Deadline bookkeeping for one worker loop.
///
/// Owned by the worker thread; only the flags are shared.
pub struct RefreshScheduler {
    query_interval: Duration,
    send_interval: Duration,
    login_min_interval: Duration,
    next_query_at: Instant,
    next_send_at: Instant,
    last_login_at: Option<Instant>,
}

impl RefreshScheduler {
    /// Default venue query interval. Venue flow control typically allows
    /// about one query per second; stay just above that.
    pub const DEFAULT_QUERY_INTERVAL: Duration = Duration::from_millis(1_100);
    /// Default consolidated client-push interval.
    pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_millis(250);
    /// Default minimum spacing between venue login requests.
    pub const DEFAULT_LOGIN_MIN_INTERVAL: Duration = Duration::from_secs(2);

    /// Create a scheduler with explicit intervals. Both deadlines start
    /// eligible so the first poll fires immediately.
    pub fn new(
        query_interval: Duration,
        send_interval: Duration,
        login_min_interval: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            query_interval,
            send_interval,
            login_min_interval,
            next_query_at: now,
            next_send_at: now,
            last_login_at: None,
        }
    }

    /// Create a scheduler with the default intervals.
    pub fn with_defaults() -> Self {
        Self::new(
            Self::DEFAULT_QUERY_INTERVAL,
            Self::DEFAULT_SEND_INTERVAL,
            Self::DEFAULT_LOGIN_MIN_INTERVAL,
        )
    }

    /// If the query deadline has passed and a refresh is pending, clear the
    /// highest-priority pending flag, advance the deadline, and return the
    /// category to query. Otherwise `None`; the deadline is advanced only
    /// when a query is actually issued.
    pub fn next_query(&mut self, now: Instant, flags: &RefreshFlags) -> Option<RefreshKind> {
        if now < self.next_query_at {
            return None;
        }
        for kind in REFRESH_ORDER {
            if flags.take(kind) {
                self.next_query_at = now + self.query_interval;
                return Some(kind);
            }
        }
        None
    }

    /// True when a consolidated update should be pushed to the client:
    /// state changed since the last push and the send deadline has passed.
    /// Clears the dirty flag and advances the deadline on `true`.
    pub fn should_send(&mut self, now: Instant, flags: &RefreshFlags) -> bool {
        if now >= self.next_send_at && flags.take_changed() {
            self.next_send_at = now + self.send_interval;
            true
        } else {
            false
        }
    }

    /// True when a (re-)login request to the venue is allowed now. Records
    /// the attempt on `true`.
    pub fn try_login(&mut self, now: Instant) -> bool {
        match self.last_login_at {
            Some(last) if now.duration_since(last) < self.login_min_interval => false,
            _ => {
                self.last_login_at = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_scheduler() -> RefreshScheduler {
        RefreshScheduler::new(
            Duration::from_millis(100),
            Duration::from_millis(50),
            Duration::from_millis(200),
        )
    }

    #[test]
    fn test_no_flags_no_query() {
        let mut sched = fast_scheduler();
        let flags = RefreshFlags::default();
        assert_eq!(sched.next_query(Instant::now(), &flags), None);
    }

    #[test]
    fn test_query_priority_order() {
        let mut sched = fast_scheduler();
        let flags = RefreshFlags::default();
        flags.request_all();

        let now = Instant::now();
        assert_eq!(sched.next_query(now, &flags), Some(RefreshKind::Account));
        // Deadline advanced; nothing until it passes again.
        assert_eq!(sched.next_query(now, &flags), None);

        let later = now + Duration::from_millis(101);
        assert_eq!(sched.next_query(later, &flags), Some(RefreshKind::Positions));
        let later = later + Duration::from_millis(101);
        assert_eq!(
            sched.next_query(later, &flags),
            Some(RefreshKind::BankTransfers)
        );
        let later = later + Duration::from_millis(101);
        assert_eq!(
            sched.next_query(later, &flags),
            Some(RefreshKind::Registration)
        );
        assert!(!flags.any_pending());
    }

    #[test]
    fn test_deadline_not_advanced_when_idle() {
        let mut sched = fast_scheduler();
        let flags = RefreshFlags::default();
        let now = Instant::now();

        assert_eq!(sched.next_query(now, &flags), None);
        // A flag raised right after still fires at the same deadline.
        flags.request(RefreshKind::Positions);
        assert_eq!(sched.next_query(now, &flags), Some(RefreshKind::Positions));
    }

    #[test]
    fn test_should_send_requires_dirty_and_deadline() {
        let mut sched = fast_scheduler();
        let flags = RefreshFlags::default();
        let now = Instant::now();

        // Deadline passed but nothing changed.
        assert!(!sched.should_send(now, &flags));

        flags.mark_changed();
        assert!(sched.should_send(now, &flags));
        // Dirty flag consumed, deadline advanced.
        assert!(!sched.should_send(now, &flags));

        // Changed again, but inside the send interval: held back.
        flags.mark_changed();
        assert!(!sched.should_send(now + Duration::from_millis(10), &flags));
        assert!(sched.should_send(now + Duration::from_millis(51), &flags));
    }

    #[test]
    fn test_dirty_flag_not_lost_before_deadline() {
        let mut sched = fast_scheduler();
        let flags = RefreshFlags::default();
        let now = Instant::now();

        assert!(sched.should_send(now, &flags) == false);
        flags.mark_changed();
        // Consume the first send to arm the deadline.
        assert!(sched.should_send(now, &flags));

        flags.mark_changed();
        // Deadline not reached: the flag must survive the refusal.
        assert!(!sched.should_send(now + Duration::from_millis(10), &flags));
        assert!(sched.should_send(now + Duration::from_millis(60), &flags));
    }

    #[test]
    fn test_login_throttle() {
        let mut sched = fast_scheduler();
        let now = Instant::now();

        assert!(sched.try_login(now));
        assert!(!sched.try_login(now + Duration::from_millis(100)));
        assert!(sched.try_login(now + Duration::from_millis(201)));
    }

    #[test]
    fn test_flags_settable_across_threads() {
        use std::sync::Arc;

        let flags = Arc::new(RefreshFlags::default());
        let f = flags.clone();
        std::thread::spawn(move || {
            f.request(RefreshKind::Account);
            f.mark_changed();
        })
        .join()
        .unwrap();

        assert!(flags.any_pending());
        assert!(flags.take_changed());
    }
}
