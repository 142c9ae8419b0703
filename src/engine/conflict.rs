use std::collections::HashSet;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

/// Reject spans a reservation may never have, before any conflict lookup.
pub fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::Validation(format!(
            "reservation must end after it starts: [{}, {})",
            span.start, span.end
        )));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_RESERVATION_DURATION_MS {
        return Err(EngineError::LimitExceeded("reservation too long"));
    }
    Ok(())
}

/// Participant list of a new reservation: the creator first, each user once.
pub fn participant_list(created_by: &UserId, requested: Vec<UserId>) -> Result<Vec<UserId>, EngineError> {
    let mut participants = Vec::with_capacity(requested.len() + 1);
    participants.push(created_by.clone());
    let mut seen = HashSet::from([created_by.clone()]);
    participants.extend(requested.into_iter().filter(|p| seen.insert(p.clone())));
    if participants.len() > MAX_PARTICIPANTS {
        return Err(EngineError::LimitExceeded("too many participants"));
    }
    Ok(participants)
}

/// Decide whether `proposed` may be booked next to `existing` reservations of the
/// same court. Canceled and completed reservations never block.
///
/// Returns the first blocking reservation as `Conflict`.
pub fn check_conflict<'a, I>(existing: I, proposed: &Span) -> Result<(), EngineError>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    for r in existing {
        if r.status.is_active() && proposed.conflicts_with(&r.span) {
            return Err(EngineError::Conflict(r.id));
        }
    }
    Ok(())
}

/// Conflict check against a court's state, scanning only reservations near `span`.
pub(crate) fn check_court_free(cs: &CourtState, span: &Span) -> Result<(), EngineError> {
    check_conflict(cs.overlapping(*span), span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    const DAY: Ms = 1_792_368_000_000; // 2026-10-19T00:00Z

    fn at(h: Ms, m: Ms) -> Ms {
        DAY + h * HOUR_MS + m * MINUTE_MS
    }

    fn existing(start: Ms, end: Ms, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            court_id: Ulid::new(),
            date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            span: Span::new(start, end),
            status,
            participants: vec![],
            created_by: UserId::new("bia"),
            created_at: DAY,
        }
    }

    #[test]
    fn overlap_with_start_inside_rejected() {
        let r = existing(at(10, 0), at(11, 0), ReservationStatus::Confirmed);
        let result = check_conflict([&r], &Span::new(at(10, 30), at(11, 30)));
        assert!(matches!(result, Err(EngineError::Conflict(id)) if id == r.id));
    }

    #[test]
    fn adjacent_before_accepted() {
        let r = existing(at(10, 0), at(11, 0), ReservationStatus::Confirmed);
        assert!(check_conflict([&r], &Span::new(at(9, 0), at(10, 0))).is_ok());
        assert!(check_conflict([&r], &Span::new(at(11, 0), at(12, 0))).is_ok());
    }

    #[test]
    fn end_inside_and_containment_rejected() {
        let r = existing(at(10, 0), at(11, 0), ReservationStatus::Pending);
        assert!(check_conflict([&r], &Span::new(at(9, 30), at(10, 30))).is_err());
        assert!(check_conflict([&r], &Span::new(at(9, 0), at(12, 0))).is_err());
        assert!(check_conflict([&r], &Span::new(at(10, 15), at(10, 45))).is_err());
    }

    #[test]
    fn inactive_reservations_never_block() {
        let canceled = existing(at(14, 0), at(15, 0), ReservationStatus::Canceled);
        let completed = existing(
            at(14, 0),
            at(15, 0),
            ReservationStatus::Completed {
                result: MatchResult { score_a: 2, score_b: 1, winners: vec![] },
            },
        );
        let proposed = Span::new(at(14, 0), at(15, 0));
        assert!(check_conflict([&canceled, &completed], &proposed).is_ok());
    }

    #[test]
    fn first_blocker_reported() {
        let a = existing(at(8, 0), at(9, 0), ReservationStatus::Confirmed);
        let b = existing(at(9, 0), at(10, 0), ReservationStatus::Confirmed);
        let result = check_conflict([&a, &b], &Span::new(at(8, 30), at(9, 30)));
        assert!(matches!(result, Err(EngineError::Conflict(id)) if id == a.id));
    }

    #[test]
    fn validate_span_limits() {
        assert!(validate_span(&Span::new(at(9, 0), at(10, 0))).is_ok());
        assert!(matches!(
            validate_span(&Span { start: at(10, 0), end: at(10, 0) }),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate_span(&Span::new(0, 1000)),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_span(&Span::new(at(0, 0), at(0, 0) + 2 * DAY_MS)),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn creator_leads_the_participant_list_once() {
        let ana = UserId::new("ana");
        let list = participant_list(
            &ana,
            vec![UserId::new("bruno"), ana.clone(), UserId::new("bruno")],
        )
        .unwrap();
        assert_eq!(list, vec![ana, UserId::new("bruno")]);
    }

    #[test]
    fn participant_cap_counts_the_creator() {
        let ana = UserId::new("ana");
        let others: Vec<UserId> = (1..MAX_PARTICIPANTS).map(|i| UserId::new(format!("p{i}"))).collect();
        assert_eq!(participant_list(&ana, others.clone()).unwrap().len(), MAX_PARTICIPANTS);

        let mut crowd = others;
        crowd.push(UserId::new("extra"));
        assert_eq!(
            participant_list(&ana, crowd),
            Err(EngineError::LimitExceeded("too many participants"))
        );
    }
}
