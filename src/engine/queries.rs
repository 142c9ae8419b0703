use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::free_windows;
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_court(&self, id: Ulid) -> Result<Court, EngineError> {
        let cs = self.court_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = cs.read().await;
        Ok(guard.court.clone())
    }

    /// All courts, active or not, ordered by name.
    pub async fn list_courts(&self) -> Vec<Court> {
        let states: Vec<_> = self.courts.iter().map(|e| e.value().clone()).collect();
        let mut courts = Vec::with_capacity(states.len());
        for cs in states {
            courts.push(cs.read().await.court.clone());
        }
        courts.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        courts
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let court_id = self
            .court_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let cs = self
            .court_state(&court_id)
            .ok_or(EngineError::NotFound(court_id))?;
        let guard = cs.read().await;
        guard.reservation(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Reservations of a court on a local date whose status is in `statuses`,
    /// ordered by start.
    pub async fn reservations_for_day(
        &self,
        court_id: Ulid,
        date: NaiveDate,
        statuses: &[StatusKind],
    ) -> Result<Vec<Reservation>, EngineError> {
        let cs = self
            .court_state(&court_id)
            .ok_or(EngineError::NotFound(court_id))?;
        let guard = cs.read().await;
        Ok(guard
            .on_date(date)
            .filter(|r| statuses.contains(&r.status.kind()))
            .cloned()
            .collect())
    }

    /// Reservations of a court overlapping `span` whose status is in `statuses`,
    /// ordered by start.
    pub async fn reservations_overlapping(
        &self,
        court_id: Ulid,
        span: Span,
        statuses: &[StatusKind],
    ) -> Result<Vec<Reservation>, EngineError> {
        let cs = self
            .court_state(&court_id)
            .ok_or(EngineError::NotFound(court_id))?;
        let guard = cs.read().await;
        Ok(guard
            .overlapping(span)
            .filter(|r| statuses.contains(&r.status.kind()))
            .cloned()
            .collect())
    }

    /// Every reservation `user` takes part in, across courts, ordered by start.
    pub async fn reservations_for_user(&self, user: &UserId) -> Vec<Reservation> {
        let states: Vec<_> = self.courts.iter().map(|e| e.value().clone()).collect();
        let mut found = Vec::new();
        for cs in states {
            let guard = cs.read().await;
            found.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.participants.contains(user))
                    .cloned(),
            );
        }
        found.sort_by_key(|r| (r.span.start, r.id));
        found
    }

    /// Maximal free spans of a court's operating hours on `date`.
    /// Inactive courts have none.
    pub async fn free_windows(
        &self,
        court_id: Ulid,
        date: NaiveDate,
        min_duration_ms: Option<Ms>,
    ) -> Result<Vec<Span>, EngineError> {
        let cs = self
            .court_state(&court_id)
            .ok_or(EngineError::NotFound(court_id))?;
        let guard = cs.read().await;
        if !guard.court.active {
            return Ok(Vec::new());
        }
        let day_span = self.calendar.day_span(date);
        let nearby: Vec<Reservation> = guard.overlapping(day_span).cloned().collect();
        Ok(free_windows(
            &guard.court.hours,
            day_span.start,
            &nearby,
            min_duration_ms,
        ))
    }

    pub async fn get_challenge(&self, id: Ulid) -> Result<Challenge, EngineError> {
        self.challenges
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Open challenges, oldest first, optionally only those for `date`.
    pub async fn open_challenges(&self, date: Option<NaiveDate>) -> Vec<Challenge> {
        let challenges = self.challenges.read().await;
        let mut open: Vec<Challenge> = challenges
            .values()
            .filter(|c| c.status == ChallengeStatus::Open)
            .filter(|c| date.is_none_or(|d| c.date == d))
            .cloned()
            .collect();
        open.sort_by_key(|c| (c.created_at, c.id));
        open
    }
}
