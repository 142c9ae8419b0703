use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::calendar::LocalCalendar;
use crate::engine::{Engine, EngineError, check_conflict, now_ms, participant_list, validate_span};
use crate::model::*;

/// What the booking glue needs from a store: pull queries, one atomic
/// conditional write and a change feed per court.
#[async_trait]
pub trait ReservationRepository: Send + Sync {
    async fn court(&self, id: Ulid) -> Result<Court, EngineError>;

    /// Reservations of `court_id` dated `date` whose status is in `statuses`,
    /// ordered by start.
    async fn reservations_on(
        &self,
        court_id: Ulid,
        date: NaiveDate,
        statuses: &[StatusKind],
    ) -> Result<Vec<Reservation>, EngineError>;

    /// Reservations of `court_id` overlapping `span` whose status is in
    /// `statuses`, ordered by start.
    async fn reservations_during(
        &self,
        court_id: Ulid,
        span: Span,
        statuses: &[StatusKind],
    ) -> Result<Vec<Reservation>, EngineError>;

    /// Create the reservation unless an active one conflicts. The check and
    /// the write are one step.
    async fn insert_if_free(&self, draft: NewReservation) -> Result<Ulid, EngineError>;

    fn subscribe(&self, court_id: Ulid) -> broadcast::Receiver<Event>;

    fn calendar(&self) -> LocalCalendar;
}

#[async_trait]
impl ReservationRepository for Engine {
    async fn court(&self, id: Ulid) -> Result<Court, EngineError> {
        self.get_court(id).await
    }

    async fn reservations_on(
        &self,
        court_id: Ulid,
        date: NaiveDate,
        statuses: &[StatusKind],
    ) -> Result<Vec<Reservation>, EngineError> {
        self.reservations_for_day(court_id, date, statuses).await
    }

    async fn reservations_during(
        &self,
        court_id: Ulid,
        span: Span,
        statuses: &[StatusKind],
    ) -> Result<Vec<Reservation>, EngineError> {
        self.reservations_overlapping(court_id, span, statuses).await
    }

    async fn insert_if_free(&self, draft: NewReservation) -> Result<Ulid, EngineError> {
        self.create_reservation(draft).await
    }

    fn subscribe(&self, court_id: Ulid) -> broadcast::Receiver<Event> {
        self.notify.subscribe(court_id)
    }

    fn calendar(&self) -> LocalCalendar {
        self.calendar
    }
}

// ── In-memory fixture ────────────────────────────────────────────

#[derive(Default)]
struct Tables {
    courts: HashMap<Ulid, Court>,
    reservations: Vec<Reservation>,
}

/// Repository over plain in-memory tables, for exercising the booking glue
/// without a WAL.
pub struct StaticRepository {
    tables: Mutex<Tables>,
    changes: broadcast::Sender<Event>,
    calendar: LocalCalendar,
}

impl Default for StaticRepository {
    fn default() -> Self {
        Self::new(LocalCalendar::utc())
    }
}

impl StaticRepository {
    pub fn new(calendar: LocalCalendar) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            changes: broadcast::channel(64).0,
            calendar,
        }
    }

    fn tables(&self) -> Result<std::sync::MutexGuard<'_, Tables>, EngineError> {
        self.tables
            .lock()
            .map_err(|_| EngineError::Storage("fixture tables poisoned".into()))
    }

    fn select(
        &self,
        court_id: Ulid,
        statuses: &[StatusKind],
        keep: impl Fn(&Reservation) -> bool,
    ) -> Result<Vec<Reservation>, EngineError> {
        let tables = self.tables()?;
        if !tables.courts.contains_key(&court_id) {
            return Err(EngineError::NotFound(court_id));
        }
        let mut found: Vec<Reservation> = tables
            .reservations
            .iter()
            .filter(|r| r.court_id == court_id && statuses.contains(&r.status.kind()))
            .filter(|r| keep(r))
            .cloned()
            .collect();
        found.sort_by_key(|r| r.span.start);
        Ok(found)
    }

    pub fn add_court(&self, court: Court) -> Result<(), EngineError> {
        let event = Event::CourtCreated { court: court.clone() };
        self.tables()?.courts.insert(court.id, court);
        let _ = self.changes.send(event);
        Ok(())
    }

    /// Store `reservation` as given, bypassing the conflict check.
    pub fn put_reservation(&self, reservation: Reservation) -> Result<(), EngineError> {
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.tables()?.reservations.push(reservation);
        let _ = self.changes.send(event);
        Ok(())
    }

    pub fn set_status(&self, id: Ulid, status: ReservationStatus) -> Result<(), EngineError> {
        let mut tables = self.tables()?;
        let r = tables
            .reservations
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(EngineError::NotFound(id))?;
        r.status = status.clone();
        let event = Event::ReservationStatusChanged {
            id,
            court_id: r.court_id,
            status,
        };
        drop(tables);
        let _ = self.changes.send(event);
        Ok(())
    }
}

#[async_trait]
impl ReservationRepository for StaticRepository {
    async fn court(&self, id: Ulid) -> Result<Court, EngineError> {
        self.tables()?
            .courts
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    async fn reservations_on(
        &self,
        court_id: Ulid,
        date: NaiveDate,
        statuses: &[StatusKind],
    ) -> Result<Vec<Reservation>, EngineError> {
        self.select(court_id, statuses, |r| r.date == date)
    }

    async fn reservations_during(
        &self,
        court_id: Ulid,
        span: Span,
        statuses: &[StatusKind],
    ) -> Result<Vec<Reservation>, EngineError> {
        self.select(court_id, statuses, |r| r.span.overlaps(&span))
    }

    async fn insert_if_free(&self, draft: NewReservation) -> Result<Ulid, EngineError> {
        validate_span(&draft.span)?;
        let participants = participant_list(&draft.created_by, draft.participants)?;
        let date = self
            .calendar
            .date_of(draft.span.start)
            .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;

        let mut tables = self.tables()?;
        let court = tables
            .courts
            .get(&draft.court_id)
            .ok_or(EngineError::NotFound(draft.court_id))?;
        if !court.active {
            return Err(EngineError::CourtInactive(draft.court_id));
        }
        check_conflict(
            tables.reservations.iter().filter(|r| r.court_id == draft.court_id),
            &draft.span,
        )?;

        let reservation = Reservation {
            id: Ulid::new(),
            court_id: draft.court_id,
            date,
            span: draft.span,
            status: ReservationStatus::Pending,
            participants,
            created_by: draft.created_by,
            created_at: now_ms(),
        };
        let id = reservation.id;
        tables.reservations.push(reservation.clone());
        drop(tables);
        let _ = self.changes.send(Event::ReservationCreated { reservation });
        Ok(id)
    }

    /// Fixture feed: every court's changes arrive on one channel.
    fn subscribe(&self, _court_id: Ulid) -> broadcast::Receiver<Event> {
        self.changes.subscribe()
    }

    fn calendar(&self) -> LocalCalendar {
        self.calendar
    }
}
