use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use availability_cell::services::availability::AvailabilityService;
use shared_config::AppConfig;
use shared_database::supabase::{return_representation, SupabaseClient};

use crate::models::{
    Appointment, AppointmentListQuery, AppointmentStatus, BookAppointmentRequest,
    CancelAppointmentRequest, ConflictCheckResponse, NotificationEvent, NotificationEventType,
    RescheduleAppointmentRequest, ScheduleError,
};
use crate::services::conflict::{map_store_error, ConflictDetectionService};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::notify::NotificationService;

/// Books, reschedules and transitions appointments. Stateless per call:
/// every operation recomputes from persisted rows, and the current instant
/// comes in as a parameter so nothing here reads the wall clock.
pub struct AppointmentBookingService {
    supabase: Arc<SupabaseClient>,
    conflict_service: ConflictDetectionService,
    lifecycle_service: AppointmentLifecycleService,
    availability_service: AvailabilityService,
    notification_service: NotificationService,
    slot_duration_minutes: i64,
    max_advance_days: i64,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));

        Self {
            conflict_service: ConflictDetectionService::new(Arc::clone(&supabase)),
            lifecycle_service: AppointmentLifecycleService::new(),
            availability_service: AvailabilityService::new(config),
            notification_service: NotificationService::new(Arc::clone(&supabase)),
            supabase,
            slot_duration_minutes: config.slot_duration_minutes,
            max_advance_days: config.max_advance_days,
        }
    }

    /// Book an appointment into a currently available slot.
    ///
    /// Preconditions are checked in order: the date must be today or later,
    /// the start time must be in the slot set recomputed right now (client
    /// slot lists are never trusted), and the interval must not overlap an
    /// active appointment for doctor or patient. The insert itself is the
    /// authoritative conflict guard: a constraint violation from a
    /// concurrent booking surfaces as `SlotUnavailable`.
    pub async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        info!(
            "Booking appointment for patient {} with doctor {} on {} at {}",
            request.patient_id, request.doctor_id, request.appointment_date, request.start_time
        );

        let today = now.date_naive();
        if request.appointment_date < today {
            return Err(ScheduleError::PastDate);
        }
        if request.appointment_date > today + Duration::days(self.max_advance_days) {
            return Err(ScheduleError::Validation(format!(
                "Cannot schedule appointments more than {} days in advance",
                self.max_advance_days
            )));
        }

        let end_time = self.slot_end(request.start_time)?;

        self.ensure_slot_available(
            request.doctor_id,
            request.appointment_date,
            request.start_time,
            None,
            auth_token,
        )
        .await?;

        if self
            .conflict_service
            .patient_has_overlap(
                request.patient_id,
                request.appointment_date,
                request.start_time,
                end_time,
                None,
                auth_token,
            )
            .await?
        {
            return Err(ScheduleError::DoubleBooked);
        }

        let conflict_check = self
            .conflict_service
            .check_conflicts(
                request.doctor_id,
                request.appointment_date,
                request.start_time,
                end_time,
                None,
                auth_token,
            )
            .await?;
        if conflict_check.has_conflict {
            return Err(ScheduleError::SlotUnavailable);
        }

        let appointment_data = json!({
            "patient_id": request.patient_id,
            "doctor_id": request.doctor_id,
            "appointment_date": request.appointment_date,
            "start_time": request.start_time.format("%H:%M:%S").to_string(),
            "end_time": end_time.format("%H:%M:%S").to_string(),
            "appointment_type": request.appointment_type,
            "status": AppointmentStatus::Pending,
            "patient_notes": request.patient_notes,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        });

        let result: Vec<Appointment> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(auth_token),
                Some(appointment_data),
                Some(return_representation()),
            )
            .await
            .map_err(map_store_error)?;

        let appointment = result
            .into_iter()
            .next()
            .ok_or_else(|| ScheduleError::Database("Insert returned no row".to_string()))?;

        info!("Appointment {} booked as pending", appointment.id);
        self.notification_service.dispatch(
            NotificationEvent::for_appointment(NotificationEventType::Booked, &appointment, now),
            auth_token,
        );

        Ok(appointment)
    }

    /// Move an appointment to a new date/time, keeping its identity and
    /// status. Validation mirrors a fresh booking except the appointment's
    /// own interval is excluded from the conflict set.
    pub async fn reschedule_appointment(
        &self,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        let appointment = self.get_appointment(appointment_id, auth_token).await?;

        if !self.lifecycle_service.can_reschedule(appointment.status) {
            return Err(ScheduleError::InvalidTransition {
                from: appointment.status,
            });
        }
        if now.naive_utc() >= appointment.scheduled_start() {
            return Err(ScheduleError::Validation(
                "Cannot reschedule an appointment that has already started".to_string(),
            ));
        }

        let today = now.date_naive();
        if request.new_date < today {
            return Err(ScheduleError::PastDate);
        }
        if request.new_date > today + Duration::days(self.max_advance_days) {
            return Err(ScheduleError::Validation(format!(
                "Cannot schedule appointments more than {} days in advance",
                self.max_advance_days
            )));
        }

        let new_end_time = self.slot_end(request.new_start_time)?;

        self.ensure_slot_available(
            appointment.doctor_id,
            request.new_date,
            request.new_start_time,
            Some(appointment_id),
            auth_token,
        )
        .await?;

        if self
            .conflict_service
            .patient_has_overlap(
                appointment.patient_id,
                request.new_date,
                request.new_start_time,
                new_end_time,
                Some(appointment_id),
                auth_token,
            )
            .await?
        {
            return Err(ScheduleError::DoubleBooked);
        }

        let update_data = json!({
            "appointment_date": request.new_date,
            "start_time": request.new_start_time.format("%H:%M:%S").to_string(),
            "end_time": new_end_time.format("%H:%M:%S").to_string(),
            "updated_at": now.to_rfc3339()
        });

        let updated = self
            .patch_appointment(appointment_id, update_data, auth_token)
            .await?;

        info!(
            "Appointment {} rescheduled to {} at {}",
            appointment_id, request.new_date, request.new_start_time
        );
        self.notification_service.dispatch(
            NotificationEvent::for_appointment(NotificationEventType::Rescheduled, &updated, now),
            auth_token,
        );

        Ok(updated)
    }

    pub async fn confirm_appointment(
        &self,
        appointment_id: Uuid,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        let updated = self
            .transition(appointment_id, AppointmentStatus::Confirmed, None, now, auth_token)
            .await?;

        self.notification_service.dispatch(
            NotificationEvent::for_appointment(NotificationEventType::Confirmed, &updated, now),
            auth_token,
        );
        Ok(updated)
    }

    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        let notes = request.reason.map(|reason| format!("Cancelled: {}", reason));

        let updated = self
            .transition(appointment_id, AppointmentStatus::Cancelled, notes, now, auth_token)
            .await?;

        self.notification_service.dispatch(
            NotificationEvent::for_appointment(NotificationEventType::Cancelled, &updated, now),
            auth_token,
        );
        Ok(updated)
    }

    pub async fn complete_appointment(
        &self,
        appointment_id: Uuid,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        let updated = self
            .transition(appointment_id, AppointmentStatus::Completed, None, now, auth_token)
            .await?;

        self.notification_service.dispatch(
            NotificationEvent::for_appointment(NotificationEventType::Completed, &updated, now),
            auth_token,
        );
        Ok(updated)
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(map_store_error)?;

        result.into_iter().next().ok_or(ScheduleError::NotFound)
    }

    pub async fn get_patient_appointments(
        &self,
        patient_id: Uuid,
        query: &AppointmentListQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, ScheduleError> {
        let mut path = format!(
            "/rest/v1/appointments?patient_id=eq.{}&order=appointment_date.desc,start_time.desc",
            patient_id
        );
        append_list_filters(&mut path, query);

        self.supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(map_store_error)
    }

    pub async fn get_doctor_appointments(
        &self,
        doctor_id: Uuid,
        query: &AppointmentListQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, ScheduleError> {
        let mut path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&order=appointment_date.desc,start_time.desc",
            doctor_id
        );
        append_list_filters(&mut path, query);

        self.supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(map_store_error)
    }

    /// Active appointments from `now` onward, soonest first, optionally
    /// narrowed to one patient and/or one doctor.
    pub async fn get_upcoming_appointments(
        &self,
        patient_id: Option<Uuid>,
        doctor_id: Option<Uuid>,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, ScheduleError> {
        let mut path = format!(
            "/rest/v1/appointments?appointment_date=gte.{}&status=in.(pending,confirmed)&order=appointment_date.asc,start_time.asc",
            now.date_naive()
        );
        if let Some(patient_id) = patient_id {
            path.push_str(&format!("&patient_id=eq.{}", patient_id));
        }
        if let Some(doctor_id) = doctor_id {
            path.push_str(&format!("&doctor_id=eq.{}", doctor_id));
        }

        let appointments: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(map_store_error)?;

        // The date filter keeps today's rows, so drop the ones that have
        // already started.
        Ok(appointments
            .into_iter()
            .filter(|apt| apt.scheduled_start() > now.naive_utc())
            .collect())
    }

    pub async fn check_conflicts(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<ConflictCheckResponse, ScheduleError> {
        if start_time >= end_time {
            return Err(ScheduleError::InvalidInterval(
                "Start time must be before end time".to_string(),
            ));
        }

        self.conflict_service
            .check_conflicts(doctor_id, date, start_time, end_time, exclude_appointment_id, auth_token)
            .await
    }

    // ==============================================================================
    // PRIVATE HELPERS
    // ==============================================================================

    fn slot_end(&self, start_time: NaiveTime) -> Result<NaiveTime, ScheduleError> {
        let (end_time, wrapped) =
            start_time.overflowing_add_signed(Duration::minutes(self.slot_duration_minutes));
        if wrapped != 0 {
            return Err(ScheduleError::InvalidInterval(
                "Slot extends past midnight".to_string(),
            ));
        }
        Ok(end_time)
    }

    /// Recompute the slot set at validation time and require the requested
    /// start to be one of them. Stale client slot lists fail here.
    async fn ensure_slot_available(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        let slots = self
            .availability_service
            .get_available_slots(doctor_id, date, exclude_appointment_id, auth_token)
            .await
            .map_err(|e| ScheduleError::Database(e.to_string()))?;

        if !slots.iter().any(|slot| slot.start_time == start_time) {
            debug!(
                "Requested start {} not in the {} available slots for doctor {} on {}",
                start_time,
                slots.len(),
                doctor_id,
                date
            );
            return Err(ScheduleError::SlotUnavailable);
        }

        Ok(())
    }

    async fn transition(
        &self,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
        doctor_notes: Option<String>,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        let appointment = self.get_appointment(appointment_id, auth_token).await?;

        self.lifecycle_service
            .validate_transition(appointment.status, new_status)?;

        let mut update_data = serde_json::Map::new();
        update_data.insert("status".to_string(), json!(new_status));
        update_data.insert("updated_at".to_string(), json!(now.to_rfc3339()));
        if let Some(notes) = doctor_notes {
            update_data.insert("doctor_notes".to_string(), json!(notes));
        }

        let updated = self
            .patch_appointment(appointment_id, Value::Object(update_data), auth_token)
            .await?;

        info!(
            "Appointment {} transitioned {} -> {}",
            appointment_id, appointment.status, new_status
        );
        Ok(updated)
    }

    async fn patch_appointment(
        &self,
        appointment_id: Uuid,
        update_data: Value,
        auth_token: &str,
    ) -> Result<Appointment, ScheduleError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Appointment> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(update_data),
                Some(return_representation()),
            )
            .await
            .map_err(|e| {
                warn!("Failed to update appointment {}: {}", appointment_id, e);
                map_store_error(e)
            })?;

        result.into_iter().next().ok_or(ScheduleError::NotFound)
    }
}

fn append_list_filters(path: &mut String, query: &AppointmentListQuery) {
    if let Some(date) = query.date {
        path.push_str(&format!("&appointment_date=eq.{}", date));
    }
    if let Some(status) = query.status {
        path.push_str(&format!("&status=eq.{}", status));
    }
}
