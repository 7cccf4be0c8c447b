use std::sync::Arc;

use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::store::BookingStore;

use super::BookingError;

pub const PATIENT_NOT_FOUND: &str = "A patient with that ID could not be found";
pub const DOCTOR_NOT_FOUND: &str = "A doctor with that ID could not be found";
pub const BOOKING_NOT_FOUND: &str = "A booking with that ID could not be found";
pub const BOOKED_IN_PAST: &str = "An appointment cannot be booked in the past";
pub const END_NOT_AFTER_START: &str = "An appointment end time must be after the start time";
pub const DOCTOR_UNAVAILABLE: &str = "The requested appointment time with this doctor is not available";

/// Outcome of one validation pass. `errors` keeps every message in the order
/// it was produced; callers that surface a single message take the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub passed: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            errors: Vec::new(),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            passed: false,
            errors: vec![error.into()],
        }
    }

    pub fn first_error(&self) -> Option<&str> {
        self.errors.first().map(String::as_str)
    }

    fn reject(&mut self, errors: impl IntoIterator<Item = &'static str>) {
        self.passed = false;
        self.errors.extend(errors.into_iter().map(String::from));
    }

    /// Collapse to the single-message error the service reports.
    pub fn into_result(self) -> Result<(), BookingError> {
        if self.passed {
            return Ok(());
        }
        let message = self
            .errors
            .into_iter()
            .next()
            .unwrap_or_else(|| "validation failed".to_string());
        Err(BookingError::InvalidArgument(message))
    }
}

/// Validation entry points, one per kind of booking request.
pub trait RequestValidator: Send + Sync {
    fn validate_add_booking(&self, request: &AddBookingRequest) -> ValidationResult;
    fn validate_patient_id(&self, patient_id: PatientId) -> ValidationResult;
    fn validate_booking_id(&self, booking_id: Ulid) -> ValidationResult;
}

/// Checks booking requests against the store and the clock. Read-only.
pub struct BookingRequestValidator {
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
}

impl BookingRequestValidator {
    pub fn new(store: Arc<dyn BookingStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn patient_not_found(&self, patient_id: PatientId, result: &mut ValidationResult) -> bool {
        if self.store.contains_patient(patient_id) {
            return false;
        }
        result.reject([PATIENT_NOT_FOUND]);
        true
    }

    fn doctor_not_found(&self, doctor_id: DoctorId, result: &mut ValidationResult) -> bool {
        if self.store.contains_doctor(doctor_id) {
            return false;
        }
        result.reject([DOCTOR_NOT_FOUND]);
        true
    }

    /// Every check in this group runs; all failures are reported together.
    fn invalid_booking_time(
        &self,
        request: &AddBookingRequest,
        now: Ms,
        result: &mut ValidationResult,
    ) -> bool {
        let mut errors = Vec::new();
        if request.start < now {
            errors.push(BOOKED_IN_PAST);
        }
        if request.start >= request.end {
            errors.push(END_NOT_AFTER_START);
        }
        if errors.is_empty() {
            return false;
        }
        result.reject(errors);
        true
    }

    /// Soft-deleted orders still occupy their slot here, while the next-booking
    /// lookup ignores them.
    fn doctor_not_available(&self, request: &AddBookingRequest, result: &mut ValidationResult) -> bool {
        let requested = Span::new(request.start, request.end);
        let clash = self
            .store
            .doctor_orders(request.doctor_id)
            .iter()
            .any(|order| requested.intersects(&order.span));
        if clash {
            result.reject([DOCTOR_UNAVAILABLE]);
        }
        clash
    }

    fn booking_not_found(&self, booking_id: Ulid, result: &mut ValidationResult) -> bool {
        if self.store.contains_order(booking_id) {
            return false;
        }
        result.reject([BOOKING_NOT_FOUND]);
        true
    }
}

impl RequestValidator for BookingRequestValidator {
    fn validate_add_booking(&self, request: &AddBookingRequest) -> ValidationResult {
        let now = self.clock.now_ms();
        let mut result = ValidationResult::pass();

        if self.patient_not_found(request.patient_id, &mut result) {
            return result;
        }
        if self.doctor_not_found(request.doctor_id, &mut result) {
            return result;
        }
        if self.invalid_booking_time(request, now, &mut result) {
            return result;
        }
        self.doctor_not_available(request, &mut result);
        result
    }

    fn validate_patient_id(&self, patient_id: PatientId) -> ValidationResult {
        let mut result = ValidationResult::pass();
        self.patient_not_found(patient_id, &mut result);
        result
    }

    fn validate_booking_id(&self, booking_id: Ulid) -> ValidationResult {
        let mut result = ValidationResult::pass();
        self.booking_not_found(booking_id, &mut result);
        result
    }
}
