use std::sync::Mutex;

use super::validation::*;
use super::*;
use crate::clock::FixedClock;
use crate::store::Store;

const M: Ms = 60_000; // 1 minute in ms
const NOW: Ms = 1_700_000_000_000;

// ── Helpers ──────────────────────────────────────────────

fn seeded_store() -> Arc<Store> {
    let store = Arc::new(Store::in_memory());
    store.register_clinic(1, SurgeryType::SystemOne).unwrap();
    store.register_clinic(2, SurgeryType::SystemTwo).unwrap();
    store.register_patient(100, 1).unwrap();
    store.register_patient(200, 2).unwrap();
    store.register_doctor(10).unwrap();
    store.register_doctor(20).unwrap();
    store
}

fn validator(store: &Arc<Store>, clock: &Arc<FixedClock>) -> BookingRequestValidator {
    BookingRequestValidator::new(store.clone(), clock.clone())
}

fn request(start: Ms, end: Ms) -> AddBookingRequest {
    AddBookingRequest {
        patient_id: 100,
        doctor_id: 10,
        start,
        end,
    }
}

/// Existing booking for doctor 10 at [NOW+1m, NOW+3m].
fn insert_booking(store: &Store) -> Order {
    let order = Order {
        id: Ulid::new(),
        span: Span::new(NOW + M, NOW + 3 * M),
        patient_id: 200,
        doctor_id: 10,
        surgery_type: SurgeryType::SystemTwo,
        is_deleted: false,
    };
    store.add_order(order.clone()).unwrap();
    order
}

/// Returns a canned result and records which entry point was called.
struct StubValidator {
    result: ValidationResult,
    calls: Mutex<Vec<&'static str>>,
}

impl StubValidator {
    fn returning(result: ValidationResult) -> Arc<Self> {
        Arc::new(Self {
            result,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) -> ValidationResult {
        self.calls.lock().unwrap().push(call);
        self.result.clone()
    }
}

impl RequestValidator for StubValidator {
    fn validate_add_booking(&self, _request: &AddBookingRequest) -> ValidationResult {
        self.record("add_booking")
    }

    fn validate_patient_id(&self, _patient_id: PatientId) -> ValidationResult {
        self.record("patient_id")
    }

    fn validate_booking_id(&self, _booking_id: Ulid) -> ValidationResult {
        self.record("booking_id")
    }
}

fn service_with(store: &Arc<Store>, validator: Arc<dyn RequestValidator>, clock: &Arc<FixedClock>) -> BookingService {
    BookingService::new(store.clone(), validator, clock.clone())
}

fn real_service(store: &Arc<Store>, clock: &Arc<FixedClock>) -> BookingService {
    service_with(store, Arc::new(validator(store, clock)), clock)
}

// ── ValidationResult ─────────────────────────────────────

#[test]
fn validation_result_into_result_takes_first_error() {
    let result = ValidationResult {
        passed: false,
        errors: vec!["first".into(), "second".into()],
    };
    assert_eq!(result.first_error(), Some("first"));
    assert_eq!(
        result.into_result(),
        Err(BookingError::InvalidArgument("first".into()))
    );
    assert_eq!(ValidationResult::pass().into_result(), Ok(()));
}

// ── Validator: add booking ───────────────────────────────

#[test]
fn add_request_all_checks_pass() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let res = validator(&store, &clock).validate_add_booking(&request(NOW + M, NOW + 3 * M));
    assert!(res.passed);
    assert!(res.errors.is_empty());
}

#[test]
fn add_request_no_patient_stops_at_first_group() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    // Doctor and times are invalid too; only the patient error is reported.
    let req = AddBookingRequest {
        patient_id: 999,
        doctor_id: 999,
        start: NOW - M,
        end: NOW - 2 * M,
    };
    let res = validator(&store, &clock).validate_add_booking(&req);
    assert!(!res.passed);
    assert_eq!(res.errors, vec![PATIENT_NOT_FOUND.to_string()]);
}

#[test]
fn add_request_no_doctor() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let mut req = request(NOW - M, NOW - 2 * M);
    req.doctor_id = 0;
    let res = validator(&store, &clock).validate_add_booking(&req);
    assert!(!res.passed);
    assert_eq!(res.errors, vec![DOCTOR_NOT_FOUND.to_string()]);
}

#[test]
fn add_request_historical_start() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let res = validator(&store, &clock).validate_add_booking(&request(NOW - M, NOW + M));
    assert!(!res.passed);
    assert_eq!(res.errors, vec![BOOKED_IN_PAST.to_string()]);
}

#[test]
fn add_request_start_at_now_is_not_past() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let res = validator(&store, &clock).validate_add_booking(&request(NOW, NOW + M));
    assert!(res.passed);
}

#[test]
fn add_request_end_not_after_start() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let v = validator(&store, &clock);
    for minutes in [-1, 0] {
        let start = NOW + M;
        let res = v.validate_add_booking(&request(start, start + minutes * M));
        assert!(!res.passed, "end offset {minutes}m should fail");
        assert_eq!(res.errors, vec![END_NOT_AFTER_START.to_string()]);
    }
}

#[test]
fn add_request_time_errors_accumulate() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let res = validator(&store, &clock).validate_add_booking(&request(NOW - M, NOW - 2 * M));
    assert!(!res.passed);
    assert_eq!(
        res.errors,
        vec![BOOKED_IN_PAST.to_string(), END_NOT_AFTER_START.to_string()]
    );
}

#[test]
fn add_request_doctor_unavailable() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let existing = insert_booking(&store);
    let v = validator(&store, &clock);

    let adjustments = [(0, 0), (1, 0), (0, 1), (1, 1), (-1, 0), (0, -1), (-1, -1)];
    for (start_adj, end_adj) in adjustments {
        let req = request(
            existing.span.start + start_adj * M,
            existing.span.end + end_adj * M,
        );
        let res = v.validate_add_booking(&req);
        assert!(!res.passed, "({start_adj}, {end_adj}) should clash");
        assert_eq!(res.errors, vec![DOCTOR_UNAVAILABLE.to_string()]);
    }
}

#[test]
fn add_request_touching_bounds_clash() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let existing = insert_booking(&store);
    let v = validator(&store, &clock);

    // Ends exactly when the existing booking starts.
    let before = v.validate_add_booking(&request(NOW, existing.span.start));
    assert_eq!(before.errors, vec![DOCTOR_UNAVAILABLE.to_string()]);

    // Starts exactly when the existing booking ends.
    let after = v.validate_add_booking(&request(existing.span.end, existing.span.end + M));
    assert_eq!(after.errors, vec![DOCTOR_UNAVAILABLE.to_string()]);
}

#[test]
fn add_request_after_existing_booking_passes() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let existing = insert_booking(&store);
    let res = validator(&store, &clock).validate_add_booking(&request(
        existing.span.start + 3 * M,
        existing.span.start + 5 * M,
    ));
    assert!(res.passed);
}

#[test]
fn add_request_other_doctor_is_free() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let existing = insert_booking(&store);
    let mut req = request(existing.span.start, existing.span.end);
    req.doctor_id = 20;
    assert!(validator(&store, &clock).validate_add_booking(&req).passed);
}

#[test]
fn add_request_soft_deleted_booking_still_blocks() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let mut existing = insert_booking(&store);
    existing.is_deleted = true;
    store.update_order(&existing).unwrap();

    let res = validator(&store, &clock)
        .validate_add_booking(&request(existing.span.start, existing.span.end));
    assert_eq!(res.errors, vec![DOCTOR_UNAVAILABLE.to_string()]);
}

// ── Validator: patient id / booking id ───────────────────

#[test]
fn patient_id_passes_for_existing_patient() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    assert!(validator(&store, &clock).validate_patient_id(100).passed);
}

#[test]
fn patient_id_fails_for_unknown_patient() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let res = validator(&store, &clock).validate_patient_id(12345);
    assert!(!res.passed);
    assert_eq!(res.errors, vec![PATIENT_NOT_FOUND.to_string()]);
}

#[test]
fn booking_id_passes_for_existing_booking() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let existing = insert_booking(&store);
    assert!(validator(&store, &clock).validate_booking_id(existing.id).passed);
}

#[test]
fn booking_id_fails_for_unknown_booking() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let res = validator(&store, &clock).validate_booking_id(Ulid::new());
    assert!(!res.passed);
    assert_eq!(res.errors, vec![BOOKING_NOT_FOUND.to_string()]);
}

// ── Service with stub validator ──────────────────────────

#[test]
fn add_booking_validates_request() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let stub = StubValidator::returning(ValidationResult::pass());
    let service = service_with(&store, stub.clone(), &clock);

    service.add_booking(request(NOW + M, NOW + 2 * M)).unwrap();
    assert_eq!(stub.calls(), vec!["add_booking"]);
}

#[test]
fn add_booking_validator_fails_reports_first_error() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let stub = StubValidator::returning(ValidationResult {
        passed: false,
        errors: vec!["first problem".into(), "second problem".into()],
    });
    let service = service_with(&store, stub, &clock);

    let err = service.add_booking(request(NOW + M, NOW + 2 * M)).unwrap_err();
    assert_eq!(err, BookingError::InvalidArgument("first problem".into()));
    assert!(err.is_client_error());
    assert_eq!(store.order_count(), 0);
}

#[test]
fn add_booking_stores_order_with_clinic_surgery_type() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let service = service_with(&store, StubValidator::returning(ValidationResult::pass()), &clock);

    let req = AddBookingRequest {
        patient_id: 200, // clinic 2 → SystemTwo
        doctor_id: 20,
        start: NOW + M,
        end: NOW + 2 * M,
    };
    service.add_booking(req).unwrap();

    let orders = store.patient_orders(200);
    assert_eq!(orders.len(), 1);
    let order = &orders[0];
    assert_eq!(order.span, Span::new(NOW + M, NOW + 2 * M));
    assert_eq!(order.patient_id, 200);
    assert_eq!(order.doctor_id, 20);
    assert_eq!(order.surgery_type, SurgeryType::SystemTwo);
    assert!(!order.is_deleted);
    assert_eq!(store.doctor_orders(20), orders);
}

#[test]
fn add_booking_generates_distinct_ids() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let service = service_with(&store, StubValidator::returning(ValidationResult::pass()), &clock);

    service.add_booking(request(NOW + M, NOW + 2 * M)).unwrap();
    service.add_booking(request(NOW + 10 * M, NOW + 12 * M)).unwrap();

    let orders = store.patient_orders(100);
    assert_eq!(orders.len(), 2);
    assert_ne!(orders[0].id, orders[1].id);
}

#[test]
fn add_booking_missing_clinic_is_store_error() {
    let store = Arc::new(Store::in_memory());
    let clock = Arc::new(FixedClock::new(NOW));
    let service = service_with(&store, StubValidator::returning(ValidationResult::pass()), &clock);

    // Validator says yes, but the patient was never stored.
    let err = service.add_booking(request(NOW + M, NOW + 2 * M)).unwrap_err();
    assert!(matches!(err, BookingError::Store(StoreError::NotFound("patient", _))));
    assert!(!err.is_client_error());
}

#[test]
fn get_next_booking_validator_fails() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let stub = StubValidator::returning(ValidationResult::fail("nope"));
    let service = service_with(&store, stub.clone(), &clock);

    let err = service.get_next_booking(100).unwrap_err();
    assert_eq!(err, BookingError::InvalidArgument("nope".into()));
    assert_eq!(stub.calls(), vec!["patient_id"]);
}

#[test]
fn get_next_booking_none_when_no_bookings() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let service = service_with(&store, StubValidator::returning(ValidationResult::pass()), &clock);
    assert_eq!(service.get_next_booking(100).unwrap(), None);
}

#[test]
fn get_next_booking_returns_projection() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let service = service_with(&store, StubValidator::returning(ValidationResult::pass()), &clock);
    let existing = insert_booking(&store);

    let view = service.get_next_booking(200).unwrap().unwrap();
    assert_eq!(
        view,
        BookingView {
            id: existing.id,
            start: existing.span.start,
            end: existing.span.end,
            patient_id: 200,
            doctor_id: 10,
            surgery_type: SurgeryType::SystemTwo,
        }
    );
}

#[test]
fn get_next_booking_picks_earliest_future_non_deleted() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let service = service_with(&store, StubValidator::returning(ValidationResult::pass()), &clock);

    let make = |start: Ms, patient_id: PatientId, is_deleted: bool| {
        let order = Order {
            id: Ulid::new(),
            span: Span::new(start, start + M),
            patient_id,
            doctor_id: 10,
            surgery_type: SurgeryType::SystemOne,
            is_deleted,
        };
        store.add_order(order.clone()).unwrap();
        order
    };

    let _past = make(NOW - 10 * M, 100, false);
    let _starts_now = make(NOW, 100, false);
    let _deleted = make(NOW + M, 100, true);
    let _other_patient = make(NOW + 2 * M, 200, false);
    let later = make(NOW + 30 * M, 100, false);
    let next = make(NOW + 5 * M, 100, false);

    let view = service.get_next_booking(100).unwrap().unwrap();
    assert_eq!(view.id, next.id);

    clock.set(NOW + 10 * M);
    let view = service.get_next_booking(100).unwrap().unwrap();
    assert_eq!(view.id, later.id);

    clock.set(NOW + 60 * M);
    assert_eq!(service.get_next_booking(100).unwrap(), None);
}

#[test]
fn delete_booking_validator_fails() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let existing = insert_booking(&store);
    let stub = StubValidator::returning(ValidationResult::fail(BOOKING_NOT_FOUND));
    let service = service_with(&store, stub.clone(), &clock);

    let err = service.delete_booking(existing.id).unwrap_err();
    assert_eq!(err, BookingError::InvalidArgument(BOOKING_NOT_FOUND.into()));
    assert_eq!(stub.calls(), vec!["booking_id"]);
    assert!(!store.order(existing.id).unwrap().is_deleted);
}

#[test]
fn delete_booking_is_soft() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let service = service_with(&store, StubValidator::returning(ValidationResult::pass()), &clock);
    let existing = insert_booking(&store);

    service.delete_booking(existing.id).unwrap();

    let stored = store.order(existing.id).unwrap();
    assert!(stored.is_deleted);
    assert_eq!(stored.span, existing.span);
    assert_eq!(store.order_count(), 1);
}

// ── Service with real validator ──────────────────────────

#[test]
fn unknown_patient_rejected_everywhere() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let service = real_service(&store, &clock);

    let mut req = request(NOW + M, NOW + 2 * M);
    req.patient_id = 4242;
    assert_eq!(
        service.add_booking(req),
        Err(BookingError::InvalidArgument(PATIENT_NOT_FOUND.into()))
    );
    assert_eq!(
        service.get_next_booking(4242),
        Err(BookingError::InvalidArgument(PATIENT_NOT_FOUND.into()))
    );
}

#[test]
fn combined_time_errors_surface_first_only() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let service = real_service(&store, &clock);

    assert_eq!(
        service.add_booking(request(NOW - M, NOW - 2 * M)),
        Err(BookingError::InvalidArgument(BOOKED_IN_PAST.into()))
    );
}

#[test]
fn booking_lifecycle() {
    let store = seeded_store();
    let clock = Arc::new(FixedClock::new(NOW));
    let service = real_service(&store, &clock);

    service.add_booking(request(NOW + M, NOW + 3 * M)).unwrap();

    // Overlapping slot with the same doctor is refused.
    assert_eq!(
        service.add_booking(request(NOW + 2 * M, NOW + 4 * M)),
        Err(BookingError::InvalidArgument(DOCTOR_UNAVAILABLE.into()))
    );
    // Clear slot later on is accepted.
    service.add_booking(request(NOW + 4 * M, NOW + 6 * M)).unwrap();

    let first = service.get_next_booking(100).unwrap().unwrap();
    assert_eq!(first.start, NOW + M);
    assert_eq!(first.surgery_type, SurgeryType::SystemOne);

    service.delete_booking(first.id).unwrap();
    assert!(store.order(first.id).unwrap().is_deleted);

    let second = service.get_next_booking(100).unwrap().unwrap();
    assert_eq!(second.start, NOW + 4 * M);

    assert_eq!(
        service.delete_booking(Ulid::new()),
        Err(BookingError::InvalidArgument(BOOKING_NOT_FOUND.into()))
    );
}
