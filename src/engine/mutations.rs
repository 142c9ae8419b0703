use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_court_free, now_ms, participant_list, validate_span};
use super::{Engine, EngineError, WalCommand};

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation("court name must not be empty".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("court name too long"));
    }
    Ok(())
}

fn status_label(status: &ReservationStatus) -> &'static str {
    status.kind().as_str()
}

impl Engine {
    // ── Courts ───────────────────────────────────────────────

    pub async fn create_court(&self, draft: NewCourt) -> Result<Ulid, EngineError> {
        validate_name(&draft.name)?;
        draft.hours.validate()?;

        let _registry = self.registry.lock().await;
        if self.courts.len() >= MAX_COURTS {
            return Err(EngineError::LimitExceeded("too many courts"));
        }
        let court = Court {
            id: Ulid::new(),
            name: draft.name,
            hours: draft.hours,
            hourly_price_cents: draft.hourly_price_cents,
            active: true,
        };
        let id = court.id;
        let event = Event::CourtCreated { court: court.clone() };
        self.wal_append(&event).await?;
        self.courts.insert(id, Arc::new(RwLock::new(CourtState::new(court))));
        self.notify.send(id, &event);
        metrics::counter!(observability::EVENTS_TOTAL, "event" => observability::event_label(&event))
            .increment(1);
        info!(court = %id, "court created");
        Ok(id)
    }

    pub async fn update_court(&self, id: Ulid, update: CourtUpdate) -> Result<Court, EngineError> {
        let cs = self.court_state(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = cs.write().await;

        let mut court = guard.court.clone();
        if let Some(name) = update.name {
            validate_name(&name)?;
            court.name = name;
        }
        if let Some(hours) = update.hours {
            hours.validate()?;
            court.hours = hours;
        }
        if let Some(price) = update.hourly_price_cents {
            court.hourly_price_cents = price;
        }
        if let Some(active) = update.active {
            court.active = active;
        }

        let event = Event::CourtUpdated { court: court.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(court = %id, active = court.active, "court updated");
        Ok(court)
    }

    // ── Reservations ─────────────────────────────────────────

    /// Book `draft.span` on a court if no active reservation conflicts with it.
    ///
    /// The conflict check and the write happen under the court's write lock,
    /// so of two concurrent requests for the same time at most one succeeds.
    pub async fn create_reservation(&self, draft: NewReservation) -> Result<Ulid, EngineError> {
        validate_span(&draft.span)?;
        let participants = participant_list(&draft.created_by, draft.participants)?;
        let date = self
            .calendar
            .date_of(draft.span.start)
            .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;

        let cs = self
            .court_state(&draft.court_id)
            .ok_or(EngineError::NotFound(draft.court_id))?;
        let mut guard = cs.write().await;
        if !guard.court.active {
            return Err(EngineError::CourtInactive(draft.court_id));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_COURT {
            return Err(EngineError::LimitExceeded("too many reservations on court"));
        }

        if let Err(e) = check_court_free(&guard, &draft.span) {
            metrics::counter!(observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
            debug!(court = %draft.court_id, error = %e, "reservation rejected");
            return Err(e);
        }

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
        let event = Event::ReservationCreated { reservation };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        info!(reservation = %id, court = %draft.court_id, %date, "reservation created");
        Ok(id)
    }

    pub async fn confirm_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.transition(id, "confirm", |status| match status {
            ReservationStatus::Pending => Some(ReservationStatus::Confirmed),
            _ => None,
        })
        .await
    }

    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.transition(id, "cancel", |status| {
            status.is_active().then_some(ReservationStatus::Canceled)
        })
        .await
    }

    /// Attach a match result and mark the reservation completed.
    /// Only existence is checked; a second call replaces the result.
    pub async fn register_result(&self, id: Ulid, result: MatchResult) -> Result<Reservation, EngineError> {
        self.transition(id, "record a result for", move |_| {
            Some(ReservationStatus::Completed { result })
        })
        .await
    }

    async fn transition<F>(&self, id: Ulid, action: &'static str, next: F) -> Result<Reservation, EngineError>
    where
        F: FnOnce(&ReservationStatus) -> Option<ReservationStatus>,
    {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let current = guard
            .reservation(&id)
            .ok_or(EngineError::NotFound(id))?
            .status
            .clone();
        let status = next(&current).ok_or(EngineError::InvalidTransition {
            id,
            from: status_label(&current),
            action,
        })?;

        let court_id = guard.court.id;
        let event = Event::ReservationStatusChanged {
            id,
            court_id,
            status,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let updated = guard
            .reservation(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        info!(
            reservation = %id,
            court = %court_id,
            from = status_label(&current),
            to = status_label(&updated.status),
            "reservation status changed"
        );
        Ok(updated)
    }

    // ── Challenges ───────────────────────────────────────────

    pub async fn open_challenge(&self, draft: NewChallenge) -> Result<Ulid, EngineError> {
        if let Some(note) = &draft.note
            && note.len() > MAX_NOTE_LEN
        {
            return Err(EngineError::LimitExceeded("challenge note too long"));
        }
        if let Some(court_id) = draft.court_id
            && !self.courts.contains_key(&court_id)
        {
            return Err(EngineError::NotFound(court_id));
        }

        let mut challenges = self.challenges.write().await;
        let open = challenges
            .values()
            .filter(|c| c.status == ChallengeStatus::Open)
            .count();
        if open >= MAX_OPEN_CHALLENGES {
            return Err(EngineError::LimitExceeded("too many open challenges"));
        }

        let challenge = Challenge {
            id: Ulid::new(),
            created_by: draft.created_by,
            date: draft.date,
            court_id: draft.court_id,
            note: draft.note,
            status: ChallengeStatus::Open,
            created_at: now_ms(),
        };
        let id = challenge.id;
        let event = Event::ChallengeOpened { challenge };
        self.persist_challenge_event(&mut challenges, &event).await?;
        info!(challenge = %id, "challenge opened");
        Ok(id)
    }

    /// Pair two open challenges. Both flip to matched in one event or neither does.
    pub async fn match_challenges(&self, first: Ulid, second: Ulid) -> Result<(), EngineError> {
        if first == second {
            return Err(EngineError::Validation("a challenge cannot be matched with itself".into()));
        }
        let mut challenges = self.challenges.write().await;
        let a = challenges.get(&first).ok_or(EngineError::NotFound(first))?;
        let b = challenges.get(&second).ok_or(EngineError::NotFound(second))?;
        for c in [a, b] {
            if c.status != ChallengeStatus::Open {
                return Err(EngineError::InvalidTransition {
                    id: c.id,
                    from: challenge_label(&c.status),
                    action: "match",
                });
            }
        }
        if a.created_by == b.created_by {
            return Err(EngineError::Validation("both challenges belong to the same player".into()));
        }
        if a.date != b.date {
            return Err(EngineError::Validation(format!(
                "challenges are for different dates: {} and {}",
                a.date, b.date
            )));
        }

        let event = Event::ChallengesMatched { first, second };
        self.persist_challenge_event(&mut challenges, &event).await?;
        info!(%first, %second, "challenges matched");
        Ok(())
    }

    pub async fn cancel_challenge(&self, id: Ulid) -> Result<(), EngineError> {
        let mut challenges = self.challenges.write().await;
        let c = challenges.get(&id).ok_or(EngineError::NotFound(id))?;
        if c.status != ChallengeStatus::Open {
            return Err(EngineError::InvalidTransition {
                id,
                from: challenge_label(&c.status),
                action: "cancel",
            });
        }
        let event = Event::ChallengeCanceled { id };
        self.persist_challenge_event(&mut challenges, &event).await?;
        info!(challenge = %id, "challenge canceled");
        Ok(())
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to rebuild the current state.
    ///
    /// Every court and the challenge book stay read-locked until the new log is
    /// in place, so no mutation can land in the old log and miss the snapshot.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _registry = self.registry.lock().await;
        let mut events = Vec::new();

        let court_states: Vec<_> = self.courts.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(court_states.len());
        for cs in court_states {
            guards.push(cs.read_owned().await);
        }
        guards.sort_by_key(|g| g.court.id);
        for guard in &guards {
            events.push(Event::CourtCreated {
                court: guard.court.clone(),
            });
            for reservation in &guard.reservations {
                events.push(Event::ReservationCreated {
                    reservation: reservation.clone(),
                });
            }
        }

        let challenges = self.challenges.read().await;
        let mut ordered: Vec<&Challenge> = challenges.values().collect();
        ordered.sort_by_key(|c| c.id);
        for challenge in ordered {
            events.push(Event::ChallengeOpened {
                challenge: challenge.clone(),
            });
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn challenge_label(status: &ChallengeStatus) -> &'static str {
    match status {
        ChallengeStatus::Open => "open",
        ChallengeStatus::Matched { .. } => "matched",
        ChallengeStatus::Canceled => "canceled",
    }
}
