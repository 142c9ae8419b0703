mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{free_windows, generate_slots, merge_overlapping, occupant, subtract_intervals};
pub use conflict::{check_conflict, participant_list, validate_span};
pub(crate) use conflict::now_ms;
pub use error::EngineError;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::{debug, info};
use ulid::Ulid;

use crate::calendar::LocalCalendar;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::wal::Wal;

pub type SharedCourtState = Arc<RwLock<CourtState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that are already queued when the first one arrives
/// are written together and made durable with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
    debug!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes are not carried
    // into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// The booking store: courts with their reservations, plus challenges.
///
/// Each court sits behind its own lock. A mutation holds that lock across
/// validation, the WAL append, the in-memory apply and the notification, so
/// the conflict check and the write cannot be interleaved with another booking
/// of the same court.
pub struct Engine {
    pub(super) courts: DashMap<Ulid, SharedCourtState>,
    pub(super) challenges: RwLock<HashMap<Ulid, Challenge>>,
    /// Reservation id → court id.
    pub(super) reservation_index: DashMap<Ulid, Ulid>,
    /// Serializes court creation with WAL compaction.
    pub(super) registry: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub calendar: LocalCalendar,
}

/// Apply a court-scoped event. The caller holds the court's write lock.
fn apply_to_court(cs: &mut CourtState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::CourtUpdated { court } => {
            cs.court = court.clone();
        }
        Event::ReservationCreated { reservation } => {
            index.insert(reservation.id, reservation.court_id);
            cs.insert_reservation(reservation.clone());
        }
        Event::ReservationStatusChanged { id, status, .. } => {
            if let Some(r) = cs.reservation_mut(id) {
                r.status = status.clone();
            }
        }
        // Creation happens at the map level; challenges live elsewhere.
        Event::CourtCreated { .. }
        | Event::ChallengeOpened { .. }
        | Event::ChallengesMatched { .. }
        | Event::ChallengeCanceled { .. } => {}
    }
}

fn apply_to_challenges(challenges: &mut HashMap<Ulid, Challenge>, event: &Event) {
    match event {
        Event::ChallengeOpened { challenge } => {
            challenges.insert(challenge.id, challenge.clone());
        }
        Event::ChallengesMatched { first, second } => {
            if let Some(c) = challenges.get_mut(first) {
                c.status = ChallengeStatus::Matched { with: *second };
            }
            if let Some(c) = challenges.get_mut(second) {
                c.status = ChallengeStatus::Matched { with: *first };
            }
        }
        Event::ChallengeCanceled { id } => {
            if let Some(c) = challenges.get_mut(id) {
                c.status = ChallengeStatus::Canceled;
            }
        }
        _ => {}
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task.
    /// Must be called from within a Tokio runtime.
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, calendar: LocalCalendar) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let courts: DashMap<Ulid, SharedCourtState> = DashMap::new();
        let reservation_index = DashMap::new();
        let mut challenges = HashMap::new();

        // Nothing else can see these locks yet, so try_write never contends.
        // Blocking lock calls are avoided since this may run inside async code.
        for event in &events {
            match event {
                Event::CourtCreated { court } => {
                    courts.insert(court.id, Arc::new(RwLock::new(CourtState::new(court.clone()))));
                }
                other => match other.court_id() {
                    Some(court_id) => {
                        if let Some(entry) = courts.get(&court_id) {
                            let mut guard = entry
                                .try_write()
                                .expect("replay: uncontended write");
                            apply_to_court(&mut guard, other, &reservation_index);
                        }
                    }
                    None => apply_to_challenges(&mut challenges, other),
                },
            }
        }

        info!(
            path = %wal_path.display(),
            events = events.len(),
            courts = courts.len(),
            "engine state restored"
        );

        Ok(Self {
            courts,
            challenges: RwLock::new(challenges),
            reservation_index,
            registry: Mutex::new(()),
            wal_tx,
            notify,
            calendar,
        })
    }

    /// Hand an event to the group-commit writer and wait until it is durable.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub(super) fn court_state(&self, id: &Ulid) -> Option<SharedCourtState> {
        self.courts.get(id).map(|e| e.value().clone())
    }

    pub fn court_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_index.get(reservation_id).map(|e| *e.value())
    }

    /// WAL append, apply and notify for a court the caller has locked.
    pub(super) async fn persist_and_apply(&self, cs: &mut CourtState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_court(cs, event, &self.reservation_index);
        self.notify.send(cs.court.id, event);
        metrics::counter!(observability::EVENTS_TOTAL, "event" => observability::event_label(event))
            .increment(1);
        Ok(())
    }

    /// WAL append, apply and notify for challenges the caller has locked.
    pub(super) async fn persist_challenge_event(
        &self,
        challenges: &mut HashMap<Ulid, Challenge>,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_challenges(challenges, event);
        self.notify.broadcast(event);
        metrics::counter!(observability::EVENTS_TOTAL, "event" => observability::event_label(event))
            .increment(1);
        Ok(())
    }

    /// Lookup reservation → court and take the court's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<CourtState>, EngineError> {
        let court_id = self
            .court_for_reservation(reservation_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        let cs = self
            .court_state(&court_id)
            .ok_or(EngineError::NotFound(court_id))?;
        Ok(cs.write_owned().await)
    }
}
