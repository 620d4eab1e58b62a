//! Appointment slot computation and booking
//!
//! Slots are expanded from per-weekday availability rules, stepped at the
//! appointment type's duration, filtered against existing appointments and
//! the clock. Booking re-checks overlap inside one transaction so two
//! concurrent attempts on the same slot cannot both succeed.

use crate::db::{AppointmentInsert, Database, DbError, DbResult};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("appointment type not found")]
    UnknownAppointmentType,
    #[error("slot is no longer available")]
    SlotTaken,
    #[error(transparent)]
    Db(#[from] DbError),
}

/// A bookable interval.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Slot {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

impl Slot {
    /// Human form used in proposal messages: "Monday, Jan 05 at 09:00 AM".
    pub fn display(&self) -> String {
        self.start_at.format("%A, %b %d at %I:%M %p").to_string()
    }
}

#[derive(Clone)]
pub struct Scheduler {
    db: Database,
}

impl Scheduler {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Available slots for one date and appointment type, in start order.
    ///
    /// `now` is passed in so callers control the "strictly in the future"
    /// filter (and tests control the clock).
    pub fn available_slots(
        &self,
        tenant_id: &str,
        date: NaiveDate,
        appointment_type_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<Slot>> {
        let apt_type = self.db.get_appointment_type(tenant_id, appointment_type_id)?;
        let duration = Duration::minutes(apt_type.duration_minutes);

        // 0 = Monday, matching the rule rows
        let day_of_week = date.weekday().num_days_from_monday();
        let rules = self.db.availability_rules_for_day(tenant_id, day_of_week)?;
        if rules.is_empty() {
            return Ok(Vec::new());
        }

        let day_start = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
        let day_end = day_start + Duration::days(1);
        let existing = self.db.appointments_for_day(tenant_id, day_start, day_end)?;

        let mut slots = Vec::new();
        for rule in &rules {
            let Some(window_start) = parse_wall_clock(date, &rule.start_time) else {
                tracing::warn!(rule = %rule.id, time = %rule.start_time, "Unparseable rule start");
                continue;
            };
            let Some(window_end) = parse_wall_clock(date, &rule.end_time) else {
                tracing::warn!(rule = %rule.id, time = %rule.end_time, "Unparseable rule end");
                continue;
            };

            let mut cursor = window_start;
            while cursor + duration <= window_end {
                let slot = Slot {
                    start_at: cursor,
                    end_at: cursor + duration,
                };
                let overlaps = existing
                    .iter()
                    .any(|apt| slot.start_at < apt.end_at && apt.start_at < slot.end_at);
                if !overlaps && slot.start_at > now {
                    slots.push(slot);
                }
                cursor += duration;
            }
        }
        slots.sort_by_key(|s| s.start_at);
        Ok(slots)
    }

    /// Book a slot. The overlap re-check and the insert share one
    /// transaction; a lost race surfaces as `SlotTaken`.
    pub fn book(
        &self,
        tenant_id: &str,
        appointment_type_id: &str,
        start_at: DateTime<Utc>,
        lead_id: Option<i64>,
        conversation_id: Option<&str>,
        notes: Option<&str>,
    ) -> Result<String, BookingError> {
        let apt_type = self
            .db
            .get_appointment_type(tenant_id, appointment_type_id)
            .map_err(|e| match e {
                DbError::AppointmentTypeNotFound(_) => BookingError::UnknownAppointmentType,
                other => BookingError::Db(other),
            })?;
        let end_at = start_at + Duration::minutes(apt_type.duration_minutes);

        let inserted = self.db.book_appointment_checked(&AppointmentInsert {
            tenant_id,
            lead_id,
            conversation_id,
            appointment_type_id,
            start_at,
            end_at,
            notes,
        })?;
        inserted.ok_or(BookingError::SlotTaken)
    }
}

/// Combine a date with an "HH:MM" (or "HH:MM:SS") wall-clock string.
fn parse_wall_clock(date: NaiveDate, time: &str) -> Option<DateTime<Utc>> {
    let parsed = NaiveTime::parse_from_str(time, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M:%S"))
        .ok()?;
    Some(Utc.from_utc_datetime(&date.and_time(parsed)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TenantStatus;

    fn setup() -> (Database, Scheduler, String) {
        let db = Database::open_in_memory().unwrap();
        db.create_tenant("t1", Some("Acme"), TenantStatus::Active).unwrap();
        let type_id = db
            .create_appointment_type("t1", "Consultation", None, 30)
            .unwrap();
        // Mon-Fri 09:00-17:00
        for day in 0..5 {
            db.create_availability_rule("t1", day, "09:00", "17:00").unwrap();
        }
        let scheduler = Scheduler::new(db.clone());
        (db, scheduler, type_id)
    }

    /// A Monday reasonably far in the future.
    fn next_monday() -> NaiveDate {
        let mut date = Utc::now().date_naive() + Duration::days(7);
        while date.weekday().num_days_from_monday() != 0 {
            date += Duration::days(1);
        }
        date
    }

    #[test]
    fn test_slots_step_by_duration_inside_window() {
        let (_db, scheduler, type_id) = setup();
        let date = next_monday();
        let slots = scheduler
            .available_slots("t1", date, &type_id, Utc::now())
            .unwrap();
        // 09:00-17:00 at 30 minutes = 16 slots
        assert_eq!(slots.len(), 16);
        assert_eq!(slots[0].start_at.format("%H:%M").to_string(), "09:00");
        assert_eq!(slots[15].start_at.format("%H:%M").to_string(), "16:30");
        for slot in &slots {
            assert_eq!(slot.end_at - slot.start_at, Duration::minutes(30));
        }
    }

    #[test]
    fn test_no_rules_no_slots() {
        let (_db, scheduler, type_id) = setup();
        // Weekend has no availability rules
        let mut date = next_monday();
        date += Duration::days(5); // Saturday
        let slots = scheduler
            .available_slots("t1", date, &type_id, Utc::now())
            .unwrap();
        assert!(slots.is_empty());
    }

    #[test]
    fn test_booked_slot_excluded() {
        let (_db, scheduler, type_id) = setup();
        let date = next_monday();
        let slots = scheduler
            .available_slots("t1", date, &type_id, Utc::now())
            .unwrap();
        let first = slots[0].clone();

        scheduler
            .book("t1", &type_id, first.start_at, None, None, None)
            .unwrap();

        let remaining = scheduler
            .available_slots("t1", date, &type_id, Utc::now())
            .unwrap();
        assert_eq!(remaining.len(), 15);
        assert!(!remaining.contains(&first));
    }

    #[test]
    fn test_past_slots_filtered() {
        let (_db, scheduler, type_id) = setup();
        let date = next_monday();
        // Pretend it's mid-afternoon that day
        let now = Utc.from_utc_datetime(&date.and_hms_opt(15, 45, 0).unwrap());
        let slots = scheduler.available_slots("t1", date, &type_id, now).unwrap();
        // Only 16:00 and 16:30 remain
        assert_eq!(slots.len(), 2);
        assert!(slots.iter().all(|s| s.start_at > now));
    }

    #[test]
    fn test_double_booking_rejected() {
        let (_db, scheduler, type_id) = setup();
        let date = next_monday();
        let start = Utc.from_utc_datetime(&date.and_hms_opt(10, 0, 0).unwrap());

        let first = scheduler.book("t1", &type_id, start, None, None, None);
        assert!(first.is_ok());
        let second = scheduler.book("t1", &type_id, start, None, None, None);
        assert!(matches!(second, Err(BookingError::SlotTaken)));
    }

    #[test]
    fn test_booking_end_is_start_plus_duration() {
        let (db, scheduler, type_id) = setup();
        let date = next_monday();
        let start = Utc.from_utc_datetime(&date.and_hms_opt(11, 0, 0).unwrap());
        scheduler.book("t1", &type_id, start, None, None, None).unwrap();

        let appointments = db.list_appointments("t1", None).unwrap();
        assert_eq!(appointments.len(), 1);
        assert_eq!(appointments[0].end_at - appointments[0].start_at, Duration::minutes(30));
    }

    #[test]
    fn test_booking_with_lead_logs_activity() {
        let (db, scheduler, type_id) = setup();
        let lead_id = db.save_lead("t1", &crate::db::LeadInput::default()).unwrap();
        let date = next_monday();
        let start = Utc.from_utc_datetime(&date.and_hms_opt(9, 0, 0).unwrap());
        scheduler
            .book("t1", &type_id, start, Some(lead_id), None, None)
            .unwrap();

        let activities = db.list_lead_activities("t1", lead_id).unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].activity_type, "appointment_booked");
        assert_eq!(activities[0].created_by, "system");
    }
}
