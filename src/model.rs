use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, UTC. The only time type.
pub type Ms = i64;

pub type ClinicId = i64;
pub type PatientId = i64;
pub type DoctorId = i64;

/// Closed interval `[start, end]` covered by an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Both bounds are inclusive: spans that merely touch still intersect.
    pub fn intersects(&self, other: &Span) -> bool {
        self.start <= other.end && self.end >= other.start
    }
}

/// Clinical system a clinic runs on. Stored and exposed as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum SurgeryType {
    SystemOne = 0,
    SystemTwo = 1,
}

impl SurgeryType {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i64> for SurgeryType {
    type Error = i64;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(SurgeryType::SystemOne),
            1 => Ok(SurgeryType::SystemTwo),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clinic {
    pub id: ClinicId,
    pub surgery_type: SurgeryType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patient {
    pub id: PatientId,
    pub clinic_id: ClinicId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Doctor {
    pub id: DoctorId,
}

/// A booking between a patient and a doctor. Never physically removed;
/// deletion only flips `is_deleted`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: Ulid,
    pub span: Span,
    pub patient_id: PatientId,
    pub doctor_id: DoctorId,
    pub surgery_type: SurgeryType,
    pub is_deleted: bool,
}

/// Caller input for a new booking. Times are raw; nothing here is validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddBookingRequest {
    pub patient_id: PatientId,
    pub doctor_id: DoctorId,
    pub start: Ms,
    pub end: Ms,
}

/// The event types, flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ClinicRegistered {
        id: ClinicId,
        surgery_type: SurgeryType,
    },
    PatientRegistered {
        id: PatientId,
        clinic_id: ClinicId,
    },
    DoctorRegistered {
        id: DoctorId,
    },
    OrderAdded {
        id: Ulid,
        patient_id: PatientId,
        doctor_id: DoctorId,
        span: Span,
        surgery_type: SurgeryType,
        is_deleted: bool,
    },
    OrderUpdated {
        id: Ulid,
        patient_id: PatientId,
        doctor_id: DoctorId,
        span: Span,
        surgery_type: SurgeryType,
        is_deleted: bool,
    },
}

impl Event {
    pub fn order_added(order: &Order) -> Self {
        Event::OrderAdded {
            id: order.id,
            patient_id: order.patient_id,
            doctor_id: order.doctor_id,
            span: order.span,
            surgery_type: order.surgery_type,
            is_deleted: order.is_deleted,
        }
    }

    pub fn order_updated(order: &Order) -> Self {
        Event::OrderUpdated {
            id: order.id,
            patient_id: order.patient_id,
            doctor_id: order.doctor_id,
            span: order.span,
            surgery_type: order.surgery_type,
            is_deleted: order.is_deleted,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Read projection of an order returned by the next-booking lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingView {
    pub id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub patient_id: PatientId,
    pub doctor_id: DoctorId,
    pub surgery_type: SurgeryType,
}

impl From<&Order> for BookingView {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            start: order.span.start,
            end: order.span.end,
            patient_id: order.patient_id,
            doctor_id: order.doctor_id,
            surgery_type: order.surgery_type,
        }
    }
}
