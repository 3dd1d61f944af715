//! Per-user daily allowance, held in memory for the life of the process.
//!
//! Records are reset lazily: a record whose `last_reset` predates the
//! current local midnight counts as empty, so no scheduled job is needed.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeDelta, TimeZone};

/// Allowance units granted per user per day.
pub const DAILY_LIMIT: u32 = 5;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Midnight starting the calendar day of `now`, in `now`'s time zone.
pub fn day_boundary<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    midnight(&now.timezone(), now.date_naive())
}

/// Midnight starting the calendar day after `now`.
pub fn next_day_boundary<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    let today = now.date_naive();
    let tomorrow = today.succ_opt().unwrap_or(today);
    midnight(&now.timezone(), tomorrow)
}

/// Start of `date`. When a DST jump skips midnight, that is the instant of
/// the jump, i.e. the first wall-clock time that exists on `date`.
fn midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Tz> {
    let naive = date.and_time(NaiveTime::MIN);
    let hour = TimeDelta::hours(1);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(naive - hour))
                .earliest()
                .map(|before| before + hour)
        })
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UsageRecord {
    count: u32,
    last_reset: DateTime<Local>,
}

impl UsageRecord {
    fn is_stale(&self, today: &DateTime<Local>) -> bool {
        self.last_reset < *today
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub remaining: u32,
    pub reset: DateTime<Local>,
}

struct Inner {
    limit: u32,
    clock: Arc<dyn Clock>,
    records: Mutex<HashMap<String, UsageRecord>>,
}

/// Cheap to clone; all clones share one registry.
///
/// `remaining` is always clamped at zero. [`Tracker::decrement`] never
/// refuses, so a caller pairing it with [`Tracker::peek`] can overshoot
/// the limit under concurrency. [`Tracker::reserve`] cannot.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<Inner>,
}

impl Tracker {
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self::with_clock(limit, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(limit: u32, clock: Arc<dyn Clock>) -> Self {
        let inner = Inner {
            limit,
            clock,
            records: Mutex::new(HashMap::new()),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.inner.limit
    }

    #[must_use]
    pub fn day_boundary(&self) -> DateTime<Local> {
        day_boundary(&self.inner.clock.now())
    }

    /// Remaining allowance for today. Does not touch the registry.
    #[must_use]
    pub fn peek(&self, uid: &str) -> u32 {
        let today = self.day_boundary();
        let records = self.lock();
        let used = records
            .get(uid)
            .filter(|record| !record.is_stale(&today))
            .map_or(0, |record| record.count);
        self.remaining(used)
    }

    #[must_use]
    pub fn status(&self, uid: &str) -> Status {
        let now = self.inner.clock.now();
        Status {
            remaining: self.peek(uid),
            reset: next_day_boundary(&now),
        }
    }

    /// Consumes one unit unconditionally and returns what remains.
    pub fn decrement(&self, uid: &str) -> u32 {
        let today = self.day_boundary();
        let mut records = self.lock();
        let record = current(&mut records, uid, today);
        record.count = record.count.saturating_add(1);
        let used = record.count;
        drop(records);
        tracing::debug!(uid, used, "Consumed allowance unit.");
        self.remaining(used)
    }

    /// Consumes one unit if any remain, as a single step.
    ///
    /// The unit is given back when the returned guard is dropped without
    /// [`Reservation::commit`].
    #[must_use]
    pub fn reserve(&self, uid: &str) -> Option<Reservation> {
        let today = self.day_boundary();
        let mut records = self.lock();
        let record = current(&mut records, uid, today);
        if record.count >= self.inner.limit {
            tracing::debug!(uid, used = record.count, "Allowance exhausted.");
            return None;
        }
        record.count += 1;
        tracing::debug!(uid, used = record.count, "Reserved allowance unit.");
        Some(Reservation {
            tracker: self.clone(),
            uid: uid.to_string(),
            day: today,
            committed: false,
        })
    }

    fn refund(&self, uid: &str, day: &DateTime<Local>) {
        let mut records = self.lock();
        match records.get_mut(uid) {
            Some(record) if record.last_reset == *day && record.count > 0 => {
                record.count -= 1;
                tracing::debug!(uid, used = record.count, "Refunded allowance unit.");
            }
            _ => {
                tracing::debug!(uid, "Reservation outlived its day. Not refunded.");
            }
        }
    }

    fn remaining(&self, used: u32) -> u32 {
        self.inner.limit.saturating_sub(used)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, UsageRecord>> {
        // Counters stay consistent even if a holder panicked.
        self.inner
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Today's record for `uid`, created or reset as needed.
fn current<'a>(
    records: &'a mut HashMap<String, UsageRecord>,
    uid: &str,
    today: DateTime<Local>,
) -> &'a mut UsageRecord {
    let record = records.entry(uid.to_string()).or_insert(UsageRecord {
        count: 0,
        last_reset: today,
    });
    if record.is_stale(&today) {
        *record = UsageRecord {
            count: 0,
            last_reset: today,
        };
    }
    record
}

/// One allowance unit, held while the expensive work is in flight.
#[must_use = "dropping a reservation refunds it"]
pub struct Reservation {
    tracker: Tracker,
    uid: String,
    day: DateTime<Local>,
    committed: bool,
}

impl Reservation {
    /// Keeps the unit. Returns today's remaining allowance.
    ///
    /// The unit stays charged to the day it was reserved on. Committed
    /// after midnight, it no longer counts against the new day, which
    /// starts with the full limit. Refunds follow the same rule.
    pub fn commit(mut self) -> u32 {
        self.committed = true;
        self.tracker.peek(&self.uid)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.committed {
            self.tracker.refund(&self.uid, &self.day);
        }
    }
}
