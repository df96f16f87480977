use chrono::{NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{return_representation, StoreError, SupabaseClient};

use crate::models::{
    AvailabilityError, AvailableSlot, BookedInterval, CreateAvailabilityRequest,
    DoctorAvailability, UpdateAvailabilityRequest,
};
use crate::services::{slots, windows};

/// Statuses that keep an appointment's interval blocked when computing
/// slots. Cancelled appointments free their interval immediately.
const BLOCKING_STATUSES: &str = "in.(pending,confirmed,completed)";

pub struct AvailabilityService {
    supabase: SupabaseClient,
    slot_duration_minutes: i64,
}

impl AvailabilityService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            slot_duration_minutes: config.slot_duration_minutes,
        }
    }

    pub fn slot_duration_minutes(&self) -> i64 {
        self.slot_duration_minutes
    }

    /// Create a weekly availability window for a doctor. Overlap with the
    /// doctor's existing windows is allowed; overlapping windows are
    /// unioned at slot-generation time.
    pub async fn create_availability(
        &self,
        doctor_id: Uuid,
        request: CreateAvailabilityRequest,
        auth_token: &str,
    ) -> Result<DoctorAvailability, AvailabilityError> {
        debug!("Creating availability for doctor {}", doctor_id);

        if !(0..=6).contains(&request.day_of_week) {
            return Err(AvailabilityError::InvalidDayOfWeek(request.day_of_week));
        }
        if request.start_time >= request.end_time {
            return Err(AvailabilityError::InvalidInterval(
                "Start time must be before end time".to_string(),
            ));
        }

        let availability_data = json!({
            "doctor_id": doctor_id,
            "day_of_week": request.day_of_week,
            "start_time": request.start_time.format("%H:%M:%S").to_string(),
            "end_time": request.end_time.format("%H:%M:%S").to_string(),
            "is_available": request.is_available.unwrap_or(true),
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let result: Vec<DoctorAvailability> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/doctor_availability",
                Some(auth_token),
                Some(availability_data),
                Some(return_representation()),
            )
            .await
            .map_err(map_store_error)?;

        result
            .into_iter()
            .next()
            .ok_or_else(|| AvailabilityError::Database("Insert returned no row".to_string()))
    }

    pub async fn update_availability(
        &self,
        availability_id: Uuid,
        request: UpdateAvailabilityRequest,
        auth_token: &str,
    ) -> Result<DoctorAvailability, AvailabilityError> {
        debug!("Updating availability {}", availability_id);

        let current = self.get_availability_by_id(availability_id, auth_token).await?;

        // Validate the interval that would result from the update.
        let new_start = request.start_time.unwrap_or(current.start_time);
        let new_end = request.end_time.unwrap_or(current.end_time);
        if new_start >= new_end {
            return Err(AvailabilityError::InvalidInterval(
                "Start time must be before end time".to_string(),
            ));
        }

        let mut update_data = serde_json::Map::new();
        if let Some(start_time) = request.start_time {
            update_data.insert(
                "start_time".to_string(),
                json!(start_time.format("%H:%M:%S").to_string()),
            );
        }
        if let Some(end_time) = request.end_time {
            update_data.insert(
                "end_time".to_string(),
                json!(end_time.format("%H:%M:%S").to_string()),
            );
        }
        if let Some(is_available) = request.is_available {
            update_data.insert("is_available".to_string(), json!(is_available));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!("/rest/v1/doctor_availability?id=eq.{}", availability_id);
        let result: Vec<DoctorAvailability> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(Value::Object(update_data)),
                Some(return_representation()),
            )
            .await
            .map_err(map_store_error)?;

        result.into_iter().next().ok_or(AvailabilityError::NotFound)
    }

    pub async fn toggle_availability(
        &self,
        availability_id: Uuid,
        auth_token: &str,
    ) -> Result<DoctorAvailability, AvailabilityError> {
        let current = self.get_availability_by_id(availability_id, auth_token).await?;

        self.update_availability(
            availability_id,
            UpdateAvailabilityRequest {
                start_time: None,
                end_time: None,
                is_available: Some(!current.is_available),
            },
            auth_token,
        )
        .await
    }

    pub async fn list_availability(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<DoctorAvailability>, AvailabilityError> {
        let path = format!(
            "/rest/v1/doctor_availability?doctor_id=eq.{}&order=day_of_week.asc,start_time.asc",
            doctor_id
        );

        self.supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(map_store_error)
    }

    pub async fn delete_availability(
        &self,
        availability_id: Uuid,
        auth_token: &str,
    ) -> Result<(), AvailabilityError> {
        debug!("Deleting availability {}", availability_id);

        // Ask for the deleted rows back so the response always carries a
        // JSON body.
        let path = format!("/rest/v1/doctor_availability?id=eq.{}", availability_id);
        let deleted: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &path,
                Some(auth_token),
                None,
                Some(return_representation()),
            )
            .await
            .map_err(map_store_error)?;

        if deleted.is_empty() {
            return Err(AvailabilityError::NotFound);
        }

        Ok(())
    }

    /// Compute the available slot set for a doctor on a date: resolve the
    /// weekday's windows, subtract appointments whose status still blocks
    /// the interval, and subdivide what remains.
    ///
    /// `exclude_appointment_id` removes one appointment from the booked
    /// set, which is how a reschedule frees the interval it is vacating.
    /// Past dates resolve normally; rejecting past bookings is the
    /// booking validator's job.
    pub async fn get_available_slots(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<AvailableSlot>, AvailabilityError> {
        debug!("Calculating available slots for doctor {} on {}", doctor_id, date);

        let day = windows::day_index(date);
        let path = format!(
            "/rest/v1/doctor_availability?doctor_id=eq.{}&day_of_week=eq.{}&is_available=eq.true&order=start_time.asc",
            doctor_id, day
        );
        let rows: Vec<DoctorAvailability> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(map_store_error)?;

        let day_windows = windows::resolve_windows(&rows, date);
        if day_windows.is_empty() {
            debug!("No availability configured for doctor {} on {}", doctor_id, date);
            return Ok(Vec::new());
        }

        let booked = self
            .get_booked_intervals(doctor_id, date, exclude_appointment_id, auth_token)
            .await?;

        let slots = slots::generate_slots(&day_windows, self.slot_duration_minutes, &booked);
        debug!("Found {} available slots", slots.len());
        Ok(slots)
    }

    async fn get_booked_intervals(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<BookedInterval>, AvailabilityError> {
        let mut path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&appointment_date=eq.{}&status={}&select=start_time,end_time",
            doctor_id, date, BLOCKING_STATUSES
        );
        if let Some(exclude_id) = exclude_appointment_id {
            path.push_str(&format!("&id=neq.{}", exclude_id));
        }

        self.supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(map_store_error)
    }

    async fn get_availability_by_id(
        &self,
        availability_id: Uuid,
        auth_token: &str,
    ) -> Result<DoctorAvailability, AvailabilityError> {
        let path = format!("/rest/v1/doctor_availability?id=eq.{}", availability_id);
        let result: Vec<DoctorAvailability> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(map_store_error)?;

        result.into_iter().next().ok_or(AvailabilityError::NotFound)
    }
}

fn map_store_error(err: StoreError) -> AvailabilityError {
    match err {
        StoreError::NotFound(_) => AvailabilityError::NotFound,
        other => AvailabilityError::Database(other.to_string()),
    }
}
