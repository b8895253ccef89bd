//! Free-slot suggestion over a set of busy intervals.

use chrono::{Duration, NaiveDateTime};

/// At most this many gaps are suggested per query.
pub const MAX_SLOTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Interval {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }
}

/// Maximal gaps of length ≥ `min_len` lying fully inside `window`,
/// chronological order, capped at `limit`.
///
/// Busy intervals are clipped to the window and coalesced first, so
/// overlapping events never split a gap. Boundaries are inclusive: a gap
/// of exactly `min_len` qualifies.
pub fn free_slots(
    busy: &[Interval],
    window: Interval,
    min_len: Duration,
    limit: usize,
) -> Vec<Interval> {
    let mut spans: Vec<Interval> = busy
        .iter()
        .filter(|iv| iv.end > window.start && iv.start < window.end)
        .map(|iv| Interval {
            start: iv.start.max(window.start),
            end: iv.end.min(window.end),
        })
        .collect();
    spans.sort_by_key(|iv| iv.start);

    let mut merged: Vec<Interval> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => {
                last.end = last.end.max(span.end);
            }
            _ => merged.push(span),
        }
    }

    let mut slots = Vec::new();
    let mut cursor = window.start;
    for span in &merged {
        if span.start - cursor >= min_len {
            slots.push(Interval {
                start: cursor,
                end: span.start,
            });
        }
        cursor = span.end;
    }
    if window.end - cursor >= min_len {
        slots.push(Interval {
            start: cursor,
            end: window.end,
        });
    }

    slots.truncate(limit);
    slots
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M").unwrap()
    }

    fn iv(start: &str, end: &str) -> Interval {
        Interval::new(ts(start), ts(end)).unwrap()
    }

    #[test]
    fn exact_length_gaps_are_inclusive() {
        let busy = [
            iv("2024-06-01T09:00", "2024-06-01T10:00"),
            iv("2024-06-01T11:00", "2024-06-01T11:30"),
        ];
        let window = iv("2024-06-01T08:00", "2024-06-01T18:00");
        let slots = free_slots(&busy, window, Duration::minutes(60), MAX_SLOTS);
        assert_eq!(
            slots,
            vec![
                iv("2024-06-01T08:00", "2024-06-01T09:00"),
                iv("2024-06-01T10:00", "2024-06-01T11:00"),
                iv("2024-06-01T11:30", "2024-06-01T18:00"),
            ]
        );
    }

    #[test]
    fn overlapping_events_are_coalesced() {
        let busy = [
            iv("2024-06-01T09:00", "2024-06-01T11:00"),
            iv("2024-06-01T10:00", "2024-06-01T12:00"),
        ];
        let window = iv("2024-06-01T08:00", "2024-06-01T14:00");
        let slots = free_slots(&busy, window, Duration::minutes(30), MAX_SLOTS);
        assert_eq!(
            slots,
            vec![
                iv("2024-06-01T08:00", "2024-06-01T09:00"),
                iv("2024-06-01T12:00", "2024-06-01T14:00"),
            ]
        );
    }

    #[test]
    fn events_outside_window_are_ignored() {
        let busy = [iv("2024-06-01T01:00", "2024-06-01T02:00")];
        let window = iv("2024-06-01T08:00", "2024-06-01T10:00");
        let slots = free_slots(&busy, window, Duration::minutes(60), MAX_SLOTS);
        assert_eq!(slots, vec![iv("2024-06-01T08:00", "2024-06-01T10:00")]);
    }

    #[test]
    fn event_straddling_window_edge_is_clipped() {
        let busy = [iv("2024-06-01T07:00", "2024-06-01T09:00")];
        let window = iv("2024-06-01T08:00", "2024-06-01T12:00");
        let slots = free_slots(&busy, window, Duration::minutes(60), MAX_SLOTS);
        assert_eq!(slots, vec![iv("2024-06-01T09:00", "2024-06-01T12:00")]);
    }

    #[test]
    fn result_is_capped() {
        let mut busy = Vec::new();
        for hour in (0..20).step_by(2) {
            busy.push(iv(
                &format!("2024-06-01T{hour:02}:00"),
                &format!("2024-06-01T{hour:02}:30"),
            ));
        }
        let window = iv("2024-06-01T00:00", "2024-06-01T23:00");
        let slots = free_slots(&busy, window, Duration::minutes(10), 3);
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0].start, ts("2024-06-01T00:30"));
    }

    #[test]
    fn fully_booked_window_has_no_slots() {
        let busy = [iv("2024-06-01T08:00", "2024-06-01T18:00")];
        let window = iv("2024-06-01T08:00", "2024-06-01T18:00");
        assert!(free_slots(&busy, window, Duration::minutes(1), MAX_SLOTS).is_empty());
    }
}
