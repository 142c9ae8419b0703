use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info};
use ulid::Ulid;

use crate::engine::{EngineError, generate_slots, validate_span};
use crate::model::*;
use crate::observability;
use crate::repository::ReservationRepository;

/// Slots of a court for one local date. Inactive courts list none.
///
/// Reservations are picked by overlap with the local day, so one that starts
/// the evening before still marks the slots it runs into.
pub async fn day_slots<R>(repo: &R, court_id: Ulid, date: NaiveDate) -> Result<Vec<TimeSlot>, EngineError>
where
    R: ReservationRepository + ?Sized,
{
    let court = repo.court(court_id).await?;
    if !court.active {
        return Ok(Vec::new());
    }
    let day = repo.calendar().day_span(date);
    let taken = repo
        .reservations_during(court_id, day, StatusKind::OCCUPYING)
        .await?;
    Ok(generate_slots(&court.hours, day.start, &taken))
}

/// Validate and book through the repository's conditional write.
pub async fn book<R>(repo: &R, draft: NewReservation) -> Result<Ulid, EngineError>
where
    R: ReservationRepository + ?Sized,
{
    let started = Instant::now();
    let court_id = draft.court_id;
    let span = draft.span;

    let result = match validate_span(&span) {
        Ok(()) => repo.insert_if_free(draft).await,
        Err(e) => Err(e),
    };

    let outcome = match &result {
        Ok(_) => "booked",
        Err(e) => e.kind(),
    };
    metrics::histogram!(observability::BOOKING_DURATION_SECONDS, "outcome" => outcome)
        .record(started.elapsed().as_secs_f64());
    match &result {
        Ok(id) => info!(reservation = %id, court = %court_id, start = span.start, "booked"),
        Err(e) => debug!(court = %court_id, start = span.start, "booking refused: {e}"),
    }
    result
}

struct WatcherGauge;

impl WatcherGauge {
    fn new() -> Self {
        metrics::gauge!(observability::SLOT_WATCHERS_ACTIVE).increment(1.0);
        Self
    }
}

impl Drop for WatcherGauge {
    fn drop(&mut self) {
        metrics::gauge!(observability::SLOT_WATCHERS_ACTIVE).decrement(1.0);
    }
}

struct Watch<R: ?Sized> {
    repo: Arc<R>,
    changes: broadcast::Receiver<Event>,
    court_id: Ulid,
    date: NaiveDate,
    day: Span,
    primed: bool,
    failed: bool,
    _gauge: WatcherGauge,
}

impl<R: ?Sized> Watch<R> {
    fn touches(&self, event: &Event) -> bool {
        if event.court_id() != Some(self.court_id) {
            return false;
        }
        match event {
            Event::ReservationCreated { reservation } => reservation.span.overlaps(&self.day),
            _ => true,
        }
    }

    /// Wait for a change that may alter the snapshot. `false` once the feed is gone.
    async fn changed(&mut self) -> bool {
        loop {
            match self.changes.recv().await {
                Ok(event) if self.touches(&event) => return true,
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    debug!(court = %self.court_id, missed, "slot watcher lagged, resending snapshot");
                    return true;
                }
                Err(RecvError::Closed) => return false,
            }
        }
    }
}

/// Current slots of a court for `date`, then a fresh list after every change
/// to that court. New reservations that miss the day are skipped. Ends after
/// an error or when the change feed closes.
pub fn watch_day_slots<R>(
    repo: Arc<R>,
    court_id: Ulid,
    date: NaiveDate,
) -> BoxStream<'static, Result<Vec<TimeSlot>, EngineError>>
where
    R: ReservationRepository + ?Sized + 'static,
{
    // Subscribe before the first read so no change can fall in between.
    let changes = repo.subscribe(court_id);
    let day = repo.calendar().day_span(date);
    let watch = Watch {
        repo,
        changes,
        court_id,
        date,
        day,
        primed: false,
        failed: false,
        _gauge: WatcherGauge::new(),
    };

    stream::unfold(watch, |mut w| async move {
        if w.failed || (w.primed && !w.changed().await) {
            return None;
        }
        w.primed = true;
        let snapshot = day_slots(w.repo.as_ref(), w.court_id, w.date).await;
        w.failed = snapshot.is_err();
        Some((snapshot, w))
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::LocalCalendar;
    use crate::repository::StaticRepository;
    use std::time::Duration;

    const DAY: Ms = 1_792_368_000_000; // 2026-10-19T00:00Z

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn at(hour: Ms) -> Ms {
        DAY + hour * HOUR_MS
    }

    fn court(active: bool) -> Court {
        Court {
            id: Ulid::new(),
            name: "Quadra Central".into(),
            hours: OperatingHours::new(
                "07:00".parse().unwrap(),
                "22:00".parse().unwrap(),
                SlotDuration::from_minutes(60).unwrap(),
            )
            .unwrap(),
            hourly_price_cents: 9_000,
            active,
        }
    }

    fn fixture(court: &Court) -> StaticRepository {
        let repo = StaticRepository::new(LocalCalendar::utc());
        repo.add_court(court.clone()).unwrap();
        repo
    }

    fn existing(court_id: Ulid, start: Ms, end: Ms, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            court_id,
            date: date(),
            span: Span::new(start, end),
            status,
            participants: vec![UserId::new("bia")],
            created_by: UserId::new("bia"),
            created_at: DAY,
        }
    }

    fn draft(court_id: Ulid, start: Ms, end: Ms) -> NewReservation {
        NewReservation {
            court_id,
            span: Span::new(start, end),
            participants: vec![],
            created_by: UserId::new("duda"),
        }
    }

    fn taken_labels(slots: &[TimeSlot]) -> Vec<String> {
        slots
            .iter()
            .filter(|s| !s.available)
            .map(|s| s.label.to_string())
            .collect()
    }

    #[tokio::test]
    async fn listing_marks_the_confirmed_hour() {
        let c = court(true);
        let repo = fixture(&c);
        repo.put_reservation(existing(c.id, at(14), at(15), ReservationStatus::Confirmed))
            .unwrap();

        let slots = day_slots(&repo, c.id, date()).await.unwrap();
        assert_eq!(slots.len(), 15);
        assert_eq!(slots[0].label.to_string(), "07:00");
        assert_eq!(slots[14].label.to_string(), "21:00");
        assert_eq!(taken_labels(&slots), vec!["14:00"]);
    }

    #[tokio::test]
    async fn overlapping_booking_refused_adjacent_accepted() {
        let c = court(true);
        let repo = fixture(&c);
        let blocker = existing(c.id, at(10), at(11), ReservationStatus::Confirmed);
        let blocker_id = blocker.id;
        repo.put_reservation(blocker).unwrap();

        let err = book(&repo, draft(c.id, at(10) + 30 * MINUTE_MS, at(11) + 30 * MINUTE_MS))
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::Conflict(blocker_id));
        assert_eq!(err.to_string(), format!("time slot already taken by reservation {blocker_id}"));

        assert!(book(&repo, draft(c.id, at(9), at(10))).await.is_ok());
    }

    #[tokio::test]
    async fn canceled_booking_frees_the_hour() {
        let c = court(true);
        let repo = fixture(&c);
        repo.put_reservation(existing(c.id, at(14), at(15), ReservationStatus::Canceled))
            .unwrap();

        let slots = day_slots(&repo, c.id, date()).await.unwrap();
        assert!(slots.iter().all(|s| s.available));
        assert!(book(&repo, draft(c.id, at(14), at(15))).await.is_ok());
    }

    #[tokio::test]
    async fn inactive_court_lists_nothing_and_refuses() {
        let c = court(false);
        let repo = fixture(&c);
        assert!(day_slots(&repo, c.id, date()).await.unwrap().is_empty());
        assert_eq!(
            book(&repo, draft(c.id, at(9), at(10))).await.unwrap_err(),
            EngineError::CourtInactive(c.id)
        );
    }

    #[tokio::test]
    async fn reversed_span_never_reaches_the_store() {
        let c = court(true);
        let repo = fixture(&c);
        let mut backwards = draft(c.id, at(10), at(11));
        backwards.span = Span {
            start: at(11),
            end: at(10),
        };
        let err = book(&repo, backwards).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(repo
            .reservations_on(c.id, date(), StatusKind::ALL)
            .await
            .unwrap()
            .is_empty());
    }

    fn round_the_clock() -> Court {
        let mut c = court(true);
        c.hours = OperatingHours::new(
            "00:00".parse().unwrap(),
            "24:00".parse().unwrap(),
            SlotDuration::from_minutes(60).unwrap(),
        )
        .unwrap();
        c
    }

    #[tokio::test]
    async fn overnight_booking_marks_the_early_slots() {
        let c = round_the_clock();
        let repo = fixture(&c);
        let mut late = existing(c.id, at(-1), at(1), ReservationStatus::Confirmed);
        late.date = date().pred_opt().unwrap();
        let late_id = late.id;
        repo.put_reservation(late).unwrap();

        let slots = day_slots(&repo, c.id, date()).await.unwrap();
        assert_eq!(taken_labels(&slots), vec!["00:00"]);
        assert_eq!(slots[0].occupied_by, Some(late_id));
        assert_eq!(
            book(&repo, draft(c.id, at(0), at(1))).await.unwrap_err(),
            EngineError::Conflict(late_id)
        );
    }

    #[tokio::test]
    async fn fixture_normalises_participants_like_the_engine() {
        let c = court(true);
        let repo = fixture(&c);
        let mut crowded = draft(c.id, at(9), at(10));
        crowded.participants = vec![UserId::new("eva"), UserId::new("duda"), UserId::new("eva")];
        let id = book(&repo, crowded).await.unwrap();
        let stored = repo
            .reservations_on(c.id, date(), StatusKind::ALL)
            .await
            .unwrap();
        assert_eq!(stored[0].id, id);
        assert_eq!(stored[0].participants, vec![UserId::new("duda"), UserId::new("eva")]);

        let mut too_many = draft(c.id, at(11), at(12));
        too_many.participants = (0..crate::limits::MAX_PARTICIPANTS)
            .map(|i| UserId::new(format!("p{i}")))
            .collect();
        assert!(matches!(
            book(&repo, too_many).await.unwrap_err(),
            EngineError::LimitExceeded(_)
        ));
    }

    #[tokio::test]
    async fn unknown_court_is_not_found() {
        let repo = StaticRepository::default();
        let ghost = Ulid::new();
        assert_eq!(
            day_slots(&repo, ghost, date()).await.unwrap_err(),
            EngineError::NotFound(ghost)
        );
    }

    async fn next_snapshot(
        stream: &mut BoxStream<'static, Result<Vec<TimeSlot>, EngineError>>,
    ) -> Vec<TimeSlot> {
        tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("snapshot in time")
            .expect("stream open")
            .expect("snapshot ok")
    }

    #[tokio::test]
    async fn watch_emits_initial_then_fresh_snapshots() {
        let c = court(true);
        let repo = Arc::new(fixture(&c));
        let mut slots = watch_day_slots(repo.clone(), c.id, date());

        assert!(taken_labels(&next_snapshot(&mut slots).await).is_empty());

        let id = book(repo.as_ref(), draft(c.id, at(18), at(19))).await.unwrap();
        assert_eq!(taken_labels(&next_snapshot(&mut slots).await), vec!["18:00"]);

        repo.set_status(id, ReservationStatus::Canceled).unwrap();
        assert!(taken_labels(&next_snapshot(&mut slots).await).is_empty());
    }

    #[tokio::test]
    async fn watch_skips_bookings_on_other_dates_and_courts() {
        let c = court(true);
        let other = court(true);
        let repo = Arc::new(fixture(&c));
        repo.add_court(other.clone()).unwrap();
        let mut slots = watch_day_slots(repo.clone(), c.id, date());
        next_snapshot(&mut slots).await;

        book(repo.as_ref(), draft(c.id, at(24 + 9), at(24 + 10))).await.unwrap();
        book(repo.as_ref(), draft(other.id, at(9), at(10))).await.unwrap();
        book(repo.as_ref(), draft(c.id, at(20), at(21))).await.unwrap();

        assert_eq!(taken_labels(&next_snapshot(&mut slots).await), vec!["20:00"]);
    }

    #[tokio::test]
    async fn watch_picks_up_a_booking_from_the_night_before() {
        let c = round_the_clock();
        let repo = Arc::new(fixture(&c));
        let mut slots = watch_day_slots(repo.clone(), c.id, date());
        next_snapshot(&mut slots).await;

        book(repo.as_ref(), draft(c.id, at(-1), at(1))).await.unwrap();
        assert_eq!(taken_labels(&next_snapshot(&mut slots).await), vec!["00:00"]);
    }

    #[tokio::test]
    async fn watch_of_unknown_court_yields_one_error_then_ends() {
        let repo = Arc::new(StaticRepository::default());
        let ghost = Ulid::new();
        let mut slots = watch_day_slots(repo, ghost, date());
        assert_eq!(slots.next().await, Some(Err(EngineError::NotFound(ghost))));
        assert!(slots.next().await.is_none());
    }
}
