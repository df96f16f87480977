use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use reqwest::Method;
use tracing::{debug, warn};
use uuid::Uuid;

use availability_cell::services::slots::overlaps;
use shared_database::supabase::{StoreError, SupabaseClient};

use crate::models::{Appointment, ConflictCheckResponse, ScheduleError};

/// Statuses that participate in the conflict invariant: no two pending or
/// confirmed appointments for one doctor may overlap on a date.
const ACTIVE_STATUSES: &str = "in.(pending,confirmed)";

pub struct ConflictDetectionService {
    supabase: Arc<SupabaseClient>,
}

impl ConflictDetectionService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Check a requested [start, end) interval against the doctor's active
    /// appointments on a date. This is the fast-path check; the database
    /// exclusion constraint remains the authoritative guard at insert time.
    pub async fn check_conflicts(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<ConflictCheckResponse, ScheduleError> {
        debug!(
            "Checking conflicts for doctor {} on {} from {} to {}",
            doctor_id, date, start_time, end_time
        );

        let existing = self
            .get_active_appointments(doctor_id, date, exclude_appointment_id, auth_token)
            .await?;

        let conflicting_appointments: Vec<Appointment> = existing
            .into_iter()
            .filter(|apt| overlaps(start_time, end_time, apt.start_time, apt.end_time))
            .collect();

        let has_conflict = !conflicting_appointments.is_empty();
        if has_conflict {
            warn!(
                "Conflict detected for doctor {} on {}: {} overlapping appointments",
                doctor_id,
                date,
                conflicting_appointments.len()
            );
        }

        Ok(ConflictCheckResponse {
            has_conflict,
            conflicting_appointments,
        })
    }

    /// A patient may not hold two active appointments over the same
    /// interval, regardless of doctor.
    pub async fn patient_has_overlap(
        &self,
        patient_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<bool, ScheduleError> {
        let mut path = format!(
            "/rest/v1/appointments?patient_id=eq.{}&appointment_date=eq.{}&status={}",
            patient_id, date, ACTIVE_STATUSES
        );
        if let Some(exclude_id) = exclude_appointment_id {
            path.push_str(&format!("&id=neq.{}", exclude_id));
        }

        let existing: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(map_store_error)?;

        Ok(existing
            .iter()
            .any(|apt| overlaps(start_time, end_time, apt.start_time, apt.end_time)))
    }

    async fn get_active_appointments(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, ScheduleError> {
        let mut path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&appointment_date=eq.{}&status={}&order=start_time.asc",
            doctor_id, date, ACTIVE_STATUSES
        );
        if let Some(exclude_id) = exclude_appointment_id {
            path.push_str(&format!("&id=neq.{}", exclude_id));
        }

        self.supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(map_store_error)
    }
}

pub(crate) fn map_store_error(err: StoreError) -> ScheduleError {
    match err {
        StoreError::NotFound(_) => ScheduleError::NotFound,
        // The database-level interval constraint rejected the write: the
        // slot was taken by a concurrent booking.
        StoreError::Conflict(_) => ScheduleError::SlotUnavailable,
        other => ScheduleError::Database(other.to_string()),
    }
}
