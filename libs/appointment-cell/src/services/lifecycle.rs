use tracing::{debug, warn};

use crate::models::{AppointmentStatus, ScheduleError};

/// The appointment state machine:
///
/// ```text
/// pending ──confirm──> confirmed ──complete──> completed
///    │                     │
///    └───────cancel────────┴──> cancelled
/// ```
///
/// Completed and cancelled are terminal. Reschedule is not a status change;
/// it moves a pending or confirmed appointment in place.
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    pub fn valid_transitions(&self, current: AppointmentStatus) -> &'static [AppointmentStatus] {
        match current {
            AppointmentStatus::Pending => {
                &[AppointmentStatus::Confirmed, AppointmentStatus::Cancelled]
            }
            AppointmentStatus::Confirmed => {
                &[AppointmentStatus::Completed, AppointmentStatus::Cancelled]
            }
            AppointmentStatus::Completed => &[],
            AppointmentStatus::Cancelled => &[],
        }
    }

    /// Validate a status transition without mutating anything; callers only
    /// persist the new status after this passes.
    pub fn validate_transition(
        &self,
        current: AppointmentStatus,
        new: AppointmentStatus,
    ) -> Result<(), ScheduleError> {
        debug!("Validating status transition {} -> {}", current, new);

        if !self.valid_transitions(current).contains(&new) {
            warn!("Invalid status transition attempted: {} -> {}", current, new);
            return Err(ScheduleError::InvalidTransition { from: current });
        }

        Ok(())
    }

    /// Reschedule keeps the current status, so it is allowed exactly for
    /// the non-terminal states.
    pub fn can_reschedule(&self, current: AppointmentStatus) -> bool {
        current.is_active()
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}
