mod error;
#[cfg(test)]
mod tests;
pub mod validation;

pub use error::BookingError;
pub use validation::{BookingRequestValidator, RequestValidator, ValidationResult};

use std::sync::Arc;

use tracing::{debug, info};
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::store::{BookingStore, StoreError};

/// Validate-then-persist workflows over bookings.
///
/// Validation and the following write are separate store calls with no lock
/// spanning both: two concurrent requests for overlapping slots with the same
/// doctor can both pass validation and both be stored.
pub struct BookingService {
    store: Arc<dyn BookingStore>,
    validator: Arc<dyn RequestValidator>,
    clock: Arc<dyn Clock>,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn BookingStore>,
        validator: Arc<dyn RequestValidator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            validator,
            clock,
        }
    }

    /// Earliest non-deleted booking of the patient that starts after now.
    pub fn get_next_booking(&self, patient_id: PatientId) -> Result<Option<BookingView>, BookingError> {
        check(self.validator.validate_patient_id(patient_id), "get_next_booking")?;

        let now = self.clock.now_ms();
        let next = self
            .store
            .patient_orders(patient_id)
            .into_iter()
            .filter(|o| !o.is_deleted && o.span.start > now)
            .min_by_key(|o| o.span.start);

        Ok(next.as_ref().map(BookingView::from))
    }

    /// Store a new booking. The surgery type comes from the patient's clinic.
    pub fn add_booking(&self, request: AddBookingRequest) -> Result<(), BookingError> {
        check(self.validator.validate_add_booking(&request), "add_booking")?;

        let patient = self
            .store
            .patient(request.patient_id)
            .ok_or_else(|| StoreError::NotFound("patient", request.patient_id.to_string()))?;
        let clinic = self
            .store
            .clinic(patient.clinic_id)
            .ok_or_else(|| StoreError::NotFound("clinic", patient.clinic_id.to_string()))?;

        let order = Order {
            id: Ulid::new(),
            span: Span::new(request.start, request.end),
            patient_id: request.patient_id,
            doctor_id: request.doctor_id,
            surgery_type: clinic.surgery_type,
            is_deleted: false,
        };
        let id = order.id;
        self.store.add_order(order)?;

        metrics::counter!(crate::observability::BOOKINGS_ADDED_TOTAL).increment(1);
        info!(
            "booking {id} added: patient {} with doctor {} [{}, {}]",
            request.patient_id, request.doctor_id, request.start, request.end
        );
        Ok(())
    }

    /// Soft delete: the order stays in the store with `is_deleted` set.
    pub fn delete_booking(&self, booking_id: Ulid) -> Result<(), BookingError> {
        check(self.validator.validate_booking_id(booking_id), "delete_booking")?;

        let mut order = self
            .store
            .order(booking_id)
            .ok_or_else(|| StoreError::NotFound("order", booking_id.to_string()))?;
        order.is_deleted = true;
        self.store.update_order(&order)?;

        metrics::counter!(crate::observability::BOOKINGS_DELETED_TOTAL).increment(1);
        info!("booking {booking_id} deleted");
        Ok(())
    }
}

fn check(result: ValidationResult, operation: &'static str) -> Result<(), BookingError> {
    if !result.passed {
        debug!("{operation} rejected: {:?}", result.errors);
        metrics::counter!(crate::observability::VALIDATION_REJECTIONS_TOTAL, "operation" => operation)
            .increment(1);
    }
    result.into_result()
}
