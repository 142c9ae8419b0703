use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

/// Unix milliseconds. Every instant in the crate uses it.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Rejections raised while building or decoding a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("invalid wall-clock time {0:?}, expected HH:MM")]
    WallClock(String),
    #[error("slot duration must be a positive number of minutes")]
    ZeroDuration,
    #[error("slot duration of {0} minutes exceeds one day")]
    DurationTooLong(u32),
    #[error("opening time {opens} must be before closing time {closes}")]
    InvertedHours { opens: WallClock, closes: WallClock },
    #[error("span [{start}, {end}) is empty or inverted")]
    EmptySpan { start: Ms, end: Ms },
}

// ── Time primitives ──────────────────────────────────────────────

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSpan")]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

#[derive(Deserialize)]
struct RawSpan {
    start: Ms,
    end: Ms,
}

impl TryFrom<RawSpan> for Span {
    type Error = RecordError;

    fn try_from(raw: RawSpan) -> Result<Self, Self::Error> {
        Span::checked(raw.start, raw.end)
    }
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn checked(start: Ms, end: Ms) -> Result<Self, RecordError> {
        if start < end {
            Ok(Self { start, end })
        } else {
            Err(RecordError::EmptySpan { start, end })
        }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Booking conflict test of a proposed span (`self`) against an existing one:
    /// the proposed start falls inside it, the proposed end falls inside it,
    /// or the proposed span swallows it.
    pub fn conflicts_with(&self, existing: &Span) -> bool {
        let (s, e) = (self.start, self.end);
        let (xs, xe) = (existing.start, existing.end);
        (xs <= s && s < xe) || (xs < e && e <= xe) || (s <= xs && e >= xe)
    }
}

/// Local time of day, in minutes since midnight. Rendered as `HH:MM`.
///
/// `24:00` is representable so a court can close at the end of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WallClock(u16);

impl WallClock {
    pub const MIDNIGHT: WallClock = WallClock(0);

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        (minutes <= MINUTES_PER_DAY).then_some(Self(minutes as u16))
    }

    pub fn hm(hour: u32, minute: u32) -> Option<Self> {
        if minute >= 60 {
            return None;
        }
        Self::from_minutes(hour.checked_mul(60)? + minute)
    }

    pub fn minutes(self) -> u32 {
        self.0 as u32
    }

    /// Offset from local midnight.
    pub fn offset_ms(self) -> Ms {
        self.0 as Ms * MINUTE_MS
    }
}

impl fmt::Display for WallClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for WallClock {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || RecordError::WallClock(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(bad)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(bad());
        }
        let hour: u32 = h.parse().map_err(|_| bad())?;
        let minute: u32 = m.parse().map_err(|_| bad())?;
        WallClock::hm(hour, minute).ok_or_else(bad)
    }
}

impl TryFrom<String> for WallClock {
    type Error = RecordError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<WallClock> for String {
    fn from(w: WallClock) -> Self {
        w.to_string()
    }
}

/// Length of one bookable slot, in minutes: at least one, at most a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SlotDuration(NonZeroU32);

impl SlotDuration {
    pub fn from_minutes(minutes: u32) -> Result<Self, RecordError> {
        if minutes > MINUTES_PER_DAY {
            return Err(RecordError::DurationTooLong(minutes));
        }
        NonZeroU32::new(minutes)
            .map(Self)
            .ok_or(RecordError::ZeroDuration)
    }

    pub fn minutes(self) -> u32 {
        self.0.get()
    }

    pub fn as_ms(self) -> Ms {
        self.0.get() as Ms * MINUTE_MS
    }
}

impl TryFrom<u32> for SlotDuration {
    type Error = RecordError;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        Self::from_minutes(minutes)
    }
}

impl From<SlotDuration> for u32 {
    fn from(d: SlotDuration) -> Self {
        d.minutes()
    }
}

/// When a court can be booked and how the day is cut into slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawHours")]
pub struct OperatingHours {
    pub opens: WallClock,
    pub closes: WallClock,
    pub slot: SlotDuration,
}

#[derive(Deserialize)]
struct RawHours {
    opens: WallClock,
    closes: WallClock,
    slot: SlotDuration,
}

impl TryFrom<RawHours> for OperatingHours {
    type Error = RecordError;

    fn try_from(raw: RawHours) -> Result<Self, Self::Error> {
        OperatingHours::new(raw.opens, raw.closes, raw.slot)
    }
}

impl OperatingHours {
    pub fn new(opens: WallClock, closes: WallClock, slot: SlotDuration) -> Result<Self, RecordError> {
        if opens >= closes {
            return Err(RecordError::InvertedHours { opens, closes });
        }
        Ok(Self { opens, closes, slot })
    }

    pub fn validate(&self) -> Result<(), RecordError> {
        Self::new(self.opens, self.closes, self.slot).map(|_| ())
    }

    /// Number of whole slots between opening and closing.
    pub fn slot_count(&self) -> u32 {
        self.closes.minutes().saturating_sub(self.opens.minutes()) / self.slot.minutes()
    }
}

// ── Records ──────────────────────────────────────────────────────

/// Opaque identity handed over by the authentication provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Court {
    pub id: Ulid,
    pub name: String,
    pub hours: OperatingHours,
    pub hourly_price_cents: u64,
    pub active: bool,
}

impl Court {
    /// Price of holding this court for `span`, prorated by the minute.
    pub fn price_cents(&self, span: &Span) -> u64 {
        let minutes = (span.duration_ms() / MINUTE_MS).max(0) as u64;
        self.hourly_price_cents * minutes / 60
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCourt {
    pub name: String,
    pub hours: OperatingHours,
    pub hourly_price_cents: u64,
}

/// Partial court update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CourtUpdate {
    pub name: Option<String>,
    pub hours: Option<OperatingHours>,
    pub hourly_price_cents: Option<u64>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub score_a: u32,
    pub score_b: u32,
    #[serde(default)]
    pub winners: Vec<UserId>,
}

/// Lifecycle of a reservation. Only completed reservations carry a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Canceled,
    Completed { result: MatchResult },
}

impl ReservationStatus {
    pub fn kind(&self) -> StatusKind {
        match self {
            ReservationStatus::Pending => StatusKind::Pending,
            ReservationStatus::Confirmed => StatusKind::Confirmed,
            ReservationStatus::Canceled => StatusKind::Canceled,
            ReservationStatus::Completed { .. } => StatusKind::Completed,
        }
    }

    /// Pending and confirmed reservations block new bookings.
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }

    /// Everything but a canceled reservation marks its slot as taken.
    pub fn occupies_slot(&self) -> bool {
        !matches!(self, ReservationStatus::Canceled)
    }
}

/// Status tag without payload, used for query filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Pending,
    Confirmed,
    Canceled,
    Completed,
}

impl StatusKind {
    pub const ACTIVE: &'static [StatusKind] = &[StatusKind::Pending, StatusKind::Confirmed];
    pub const OCCUPYING: &'static [StatusKind] =
        &[StatusKind::Pending, StatusKind::Confirmed, StatusKind::Completed];
    pub const ALL: &'static [StatusKind] = &[
        StatusKind::Pending,
        StatusKind::Confirmed,
        StatusKind::Canceled,
        StatusKind::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StatusKind::Pending => "pending",
            StatusKind::Confirmed => "confirmed",
            StatusKind::Canceled => "canceled",
            StatusKind::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub court_id: Ulid,
    /// Local calendar date of `span.start`.
    pub date: NaiveDate,
    pub span: Span,
    pub status: ReservationStatus,
    pub participants: Vec<UserId>,
    pub created_by: UserId,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub court_id: Ulid,
    pub span: Span,
    pub participants: Vec<UserId>,
    pub created_by: UserId,
}

/// A candidate booking window derived from a court's hours. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeSlot {
    pub label: WallClock,
    pub start: Ms,
    pub available: bool,
    pub occupied_by: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeStatus {
    Open,
    Matched { with: Ulid },
    Canceled,
}

/// A standing "looking for a partner" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: Ulid,
    pub created_by: UserId,
    pub date: NaiveDate,
    pub court_id: Option<Ulid>,
    pub note: Option<String>,
    pub status: ChallengeStatus,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChallenge {
    pub created_by: UserId,
    pub date: NaiveDate,
    pub court_id: Option<Ulid>,
    pub note: Option<String>,
}

// ── Per-court state ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CourtState {
    pub court: Court,
    /// All reservations ever made on the court, sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl CourtState {
    pub fn new(court: Court) -> Self {
        Self {
            court,
            reservations: Vec::new(),
        }
    }

    /// Insert keeping the start-time order.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn reservation_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Reservations whose span overlaps `query`, any status.
    /// Everything from the first start at or after `query.end` is skipped.
    pub fn overlapping(&self, query: Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    pub fn on_date(&self, date: NaiveDate) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter().filter(move |r| r.date == date)
    }
}

// ── Events ───────────────────────────────────────────────────────

/// Every state change, as written to the WAL and broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CourtCreated {
        court: Court,
    },
    CourtUpdated {
        court: Court,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationStatusChanged {
        id: Ulid,
        court_id: Ulid,
        status: ReservationStatus,
    },
    ChallengeOpened {
        challenge: Challenge,
    },
    ChallengesMatched {
        first: Ulid,
        second: Ulid,
    },
    ChallengeCanceled {
        id: Ulid,
    },
}

impl Event {
    /// The court an event belongs to; challenge events belong to none.
    pub fn court_id(&self) -> Option<Ulid> {
        match self {
            Event::CourtCreated { court } | Event::CourtUpdated { court } => Some(court.id),
            Event::ReservationCreated { reservation } => Some(reservation.court_id),
            Event::ReservationStatusChanged { court_id, .. } => Some(*court_id),
            Event::ChallengeOpened { .. }
            | Event::ChallengesMatched { .. }
            | Event::ChallengeCanceled { .. } => None,
        }
    }
}
