use crate::model::*;

// ── Slot generation ───────────────────────────────────────────────

/// Cut a court's day into slots and mark which ones are taken.
///
/// `day_start` is the instant of local midnight for the day being listed.
/// A slot is emitted only if it ends at or before closing time, so the result
/// holds `hours.slot_count()` slots in chronological order.
///
/// A slot starting at `t` is occupied when a non-canceled reservation contains
/// `t`. This is point containment against the slot start, not an overlap test
/// over the whole slot.
pub fn generate_slots(hours: &OperatingHours, day_start: Ms, reservations: &[Reservation]) -> Vec<TimeSlot> {
    let step = hours.slot.minutes();
    let close = hours.closes.minutes();
    let mut slots = Vec::with_capacity(hours.slot_count() as usize);

    let mut cursor = hours.opens.minutes();
    while let Some(end) = cursor.checked_add(step)
        && end <= close
    {
        let Some(label) = WallClock::from_minutes(cursor) else {
            break;
        };
        let start = day_start + label.offset_ms();
        let occupied_by = occupant(reservations, start).map(|r| r.id);
        slots.push(TimeSlot {
            label,
            start,
            available: occupied_by.is_none(),
            occupied_by,
        });
        cursor = end;
    }

    slots
}

/// First non-canceled reservation whose span contains `t`.
pub fn occupant(reservations: &[Reservation], t: Ms) -> Option<&Reservation> {
    reservations
        .iter()
        .find(|r| r.status.occupies_slot() && r.span.contains_instant(t))
}

// ── Free windows ──────────────────────────────────────────────────

/// Maximal free spans inside operating hours once active reservations are
/// removed. Spans shorter than `min_duration_ms` are dropped.
pub fn free_windows(
    hours: &OperatingHours,
    day_start: Ms,
    reservations: &[Reservation],
    min_duration_ms: Option<Ms>,
) -> Vec<Span> {
    if hours.opens >= hours.closes {
        return Vec::new();
    }
    let open = Span::new(
        day_start + hours.opens.offset_ms(),
        day_start + hours.closes.offset_ms(),
    );

    let mut taken: Vec<Span> = reservations
        .iter()
        .filter(|r| r.status.is_active() && r.span.overlaps(&open))
        .map(|r| r.span)
        .collect();
    taken.sort_by_key(|s| s.start);
    let taken = merge_overlapping(&taken);

    let mut free = subtract_intervals(&[open], &taken);
    if let Some(min) = min_duration_ms {
        free.retain(|span| span.duration_ms() >= min);
    }
    free
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Remove sorted, disjoint `to_remove` spans from sorted `base` spans.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < b.end {
            result.push(Span::new(current_start, b.end));
        }
    }

    result
}
