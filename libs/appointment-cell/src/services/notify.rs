use std::sync::Arc;

use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};

use shared_database::supabase::{return_representation, SupabaseClient};

use crate::models::NotificationEvent;

/// Outbound notification dispatcher. Events are written to the
/// `notification_events` table for the delivery pipeline to pick up;
/// dispatch runs on a detached task so a delivery failure can never fail
/// or roll back the booking operation that produced it.
pub struct NotificationService {
    supabase: Arc<SupabaseClient>,
}

impl NotificationService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub fn dispatch(&self, event: NotificationEvent, auth_token: &str) {
        let supabase = Arc::clone(&self.supabase);
        let token = auth_token.to_string();

        tokio::spawn(async move {
            debug!(
                "Dispatching {:?} event for appointment {}",
                event.event_type, event.appointment_id
            );

            let body = json!({
                "event_type": event.event_type,
                "appointment_id": event.appointment_id,
                "patient_id": event.patient_id,
                "doctor_id": event.doctor_id,
                "created_at": event.created_at.to_rfc3339()
            });

            let result: Result<Vec<Value>, _> = supabase
                .request_with_headers(
                    Method::POST,
                    "/rest/v1/notification_events",
                    Some(&token),
                    Some(body),
                    Some(return_representation()),
                )
                .await;

            // Best effort only; the delivery pipeline retries independently.
            if let Err(e) = result {
                warn!(
                    "Failed to dispatch notification event for appointment {}: {}",
                    event.appointment_id, e
                );
            }
        });
    }
}
