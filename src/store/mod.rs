mod error;

pub use error::StoreError;

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

/// What the booking core needs from persistence: lookups over patients,
/// doctors and orders, plus order insert/update. Every write is one commit.
pub trait BookingStore: Send + Sync {
    fn patient(&self, id: PatientId) -> Option<Patient>;
    fn clinic(&self, id: ClinicId) -> Option<Clinic>;
    fn doctor(&self, id: DoctorId) -> Option<Doctor>;
    fn order(&self, id: Ulid) -> Option<Order>;

    /// All orders ever attached to the doctor, soft-deleted ones included,
    /// in insertion order.
    fn doctor_orders(&self, doctor_id: DoctorId) -> Vec<Order>;

    /// All orders of the patient, soft-deleted ones included, in insertion order.
    fn patient_orders(&self, patient_id: PatientId) -> Vec<Order>;

    fn add_order(&self, order: Order) -> Result<(), StoreError>;
    fn update_order(&self, order: &Order) -> Result<(), StoreError>;

    fn contains_patient(&self, id: PatientId) -> bool {
        self.patient(id).is_some()
    }

    fn contains_doctor(&self, id: DoctorId) -> bool {
        self.doctor(id).is_some()
    }

    fn contains_order(&self, id: Ulid) -> bool {
        self.order(id).is_some()
    }
}

/// Concurrent in-memory tables, optionally backed by a write-ahead log.
///
/// Writes are serialized: each one checks its preconditions, appends to the
/// log (fsynced) and becomes visible under a single lock. Reads never touch
/// the log. Opening a logged store replays it to rebuild the tables.
pub struct Store {
    clinics: DashMap<ClinicId, Clinic>,
    patients: DashMap<PatientId, Patient>,
    doctors: DashMap<DoctorId, Doctor>,
    orders: DashMap<Ulid, Order>,
    /// Doctor → order ids, insertion order.
    by_doctor: DashMap<DoctorId, Vec<Ulid>>,
    /// Patient → order ids, insertion order.
    by_patient: DashMap<PatientId, Vec<Ulid>>,
    /// Order id → position in insertion order. Compaction writes orders back
    /// in this order so the indexes replay identically.
    order_seq: DashMap<Ulid, u64>,
    next_seq: AtomicU64,
    /// Write lock. `None` for an in-memory store.
    wal: Mutex<Option<Wal>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Store {
    /// A store with no log. Nothing survives the process.
    pub fn in_memory() -> Self {
        Self {
            clinics: DashMap::new(),
            patients: DashMap::new(),
            doctors: DashMap::new(),
            orders: DashMap::new(),
            by_doctor: DashMap::new(),
            by_patient: DashMap::new(),
            order_seq: DashMap::new(),
            next_seq: AtomicU64::new(0),
            wal: Mutex::new(None),
        }
    }

    /// Replay the log at `wal_path` (if any) and keep appending to it.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let events = Wal::recover(wal_path)?;
        let store = Self::in_memory();
        for event in &events {
            store.apply(event);
        }
        let store = Self {
            wal: Mutex::new(Some(Wal::open(wal_path)?)),
            ..store
        };
        info!(
            "replayed {} events from {} ({} orders)",
            events.len(),
            wal_path.display(),
            store.orders.len()
        );
        Ok(store)
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    // ── Registration (patient/doctor management collaborators) ──

    pub fn register_clinic(&self, id: ClinicId, surgery_type: SurgeryType) -> Result<(), StoreError> {
        self.commit(Event::ClinicRegistered { id, surgery_type }, || {
            if self.clinics.contains_key(&id) {
                return Err(StoreError::AlreadyExists("clinic", id.to_string()));
            }
            Ok(())
        })
    }

    pub fn register_patient(&self, id: PatientId, clinic_id: ClinicId) -> Result<(), StoreError> {
        self.commit(Event::PatientRegistered { id, clinic_id }, || {
            if self.patients.contains_key(&id) {
                return Err(StoreError::AlreadyExists("patient", id.to_string()));
            }
            if !self.clinics.contains_key(&clinic_id) {
                return Err(StoreError::NotFound("clinic", clinic_id.to_string()));
            }
            Ok(())
        })
    }

    pub fn register_doctor(&self, id: DoctorId) -> Result<(), StoreError> {
        self.commit(Event::DoctorRegistered { id }, || {
            if self.doctors.contains_key(&id) {
                return Err(StoreError::AlreadyExists("doctor", id.to_string()));
            }
            Ok(())
        })
    }

    // ── Log maintenance ──────────────────────────────────────

    pub fn appends_since_compact(&self) -> Result<u64, StoreError> {
        let wal = self.wal.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(wal.as_ref().map_or(0, Wal::appends_since_compact))
    }

    /// Rewrite the log with the minimal events that rebuild the current tables.
    /// The write lock is held throughout so no commit can slip between snapshot and swap.
    pub fn compact(&self) -> Result<(), StoreError> {
        let mut guard = self.wal.lock().map_err(|_| StoreError::Poisoned)?;
        let Some(wal) = guard.as_mut() else {
            return Ok(());
        };
        let events = self.snapshot_events();
        wal.compact(&events)
            .map_err(|e| StoreError::WalError(e.to_string()))?;
        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!("compacted {} to {} events", wal.path().display(), events.len());
        Ok(())
    }

    fn snapshot_events(&self) -> Vec<Event> {
        let mut clinics: Vec<Clinic> = self.clinics.iter().map(|e| e.value().clone()).collect();
        clinics.sort_by_key(|c| c.id);
        let mut patients: Vec<Patient> = self.patients.iter().map(|e| e.value().clone()).collect();
        patients.sort_by_key(|p| p.id);
        let mut doctor_ids: Vec<DoctorId> = self.doctors.iter().map(|e| *e.key()).collect();
        doctor_ids.sort();
        let mut orders: Vec<(u64, Order)> = self
            .orders
            .iter()
            .map(|e| (self.order_seq.get(e.key()).map_or(0, |s| *s), e.value().clone()))
            .collect();
        orders.sort_by_key(|(seq, _)| *seq);

        let mut events = Vec::with_capacity(clinics.len() + patients.len() + doctor_ids.len() + orders.len());
        events.extend(clinics.into_iter().map(|c| Event::ClinicRegistered {
            id: c.id,
            surgery_type: c.surgery_type,
        }));
        events.extend(patients.into_iter().map(|p| Event::PatientRegistered {
            id: p.id,
            clinic_id: p.clinic_id,
        }));
        events.extend(doctor_ids.into_iter().map(|id| Event::DoctorRegistered { id }));
        events.extend(orders.iter().map(|(_, o)| Event::order_added(o)));
        events
    }

    // ── Commit + apply ───────────────────────────────────────

    /// Check `precondition`, log the event (if logged), then apply it, all
    /// under the write lock. Log order is in-memory order, and no other write
    /// can land between the check and the apply.
    fn commit(
        &self,
        event: Event,
        precondition: impl FnOnce() -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut wal = self.wal.lock().map_err(|_| StoreError::Poisoned)?;
        precondition()?;
        if let Some(wal) = wal.as_mut() {
            wal.append(&event)
                .map_err(|e| StoreError::WalError(e.to_string()))?;
        }
        self.apply(&event);
        Ok(())
    }

    fn apply(&self, event: &Event) {
        match event {
            Event::ClinicRegistered { id, surgery_type } => {
                self.clinics.insert(*id, Clinic { id: *id, surgery_type: *surgery_type });
            }
            Event::PatientRegistered { id, clinic_id } => {
                self.patients.insert(*id, Patient { id: *id, clinic_id: *clinic_id });
            }
            Event::DoctorRegistered { id } => {
                self.doctors.insert(*id, Doctor { id: *id });
            }
            Event::OrderAdded {
                id,
                patient_id,
                doctor_id,
                span,
                surgery_type,
                is_deleted,
            } => {
                self.orders.insert(
                    *id,
                    Order {
                        id: *id,
                        span: *span,
                        patient_id: *patient_id,
                        doctor_id: *doctor_id,
                        surgery_type: *surgery_type,
                        is_deleted: *is_deleted,
                    },
                );
                self.by_doctor.entry(*doctor_id).or_default().push(*id);
                self.by_patient.entry(*patient_id).or_default().push(*id);
                self.order_seq
                    .insert(*id, self.next_seq.fetch_add(1, Ordering::Relaxed));
            }
            Event::OrderUpdated {
                id,
                patient_id,
                doctor_id,
                span,
                surgery_type,
                is_deleted,
            } => {
                let previous = self.orders.insert(
                    *id,
                    Order {
                        id: *id,
                        span: *span,
                        patient_id: *patient_id,
                        doctor_id: *doctor_id,
                        surgery_type: *surgery_type,
                        is_deleted: *is_deleted,
                    },
                );
                if let Some(prev) = previous {
                    if prev.doctor_id != *doctor_id {
                        unindex(&self.by_doctor, prev.doctor_id, id);
                        self.by_doctor.entry(*doctor_id).or_default().push(*id);
                    }
                    if prev.patient_id != *patient_id {
                        unindex(&self.by_patient, prev.patient_id, id);
                        self.by_patient.entry(*patient_id).or_default().push(*id);
                    }
                }
            }
        }
    }

    fn collect_orders(&self, index: &DashMap<i64, Vec<Ulid>>, key: i64) -> Vec<Order> {
        let ids = index
            .get(&key)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.orders.get(id).map(|e| e.value().clone()))
            .collect()
    }
}

fn unindex(index: &DashMap<i64, Vec<Ulid>>, key: i64, id: &Ulid) {
    if let Some(mut ids) = index.get_mut(&key) {
        ids.retain(|o| o != id);
    }
}

impl BookingStore for Store {
    fn patient(&self, id: PatientId) -> Option<Patient> {
        self.patients.get(&id).map(|e| e.value().clone())
    }

    fn clinic(&self, id: ClinicId) -> Option<Clinic> {
        self.clinics.get(&id).map(|e| e.value().clone())
    }

    fn doctor(&self, id: DoctorId) -> Option<Doctor> {
        self.doctors.get(&id).map(|e| e.value().clone())
    }

    fn order(&self, id: Ulid) -> Option<Order> {
        self.orders.get(&id).map(|e| e.value().clone())
    }

    fn doctor_orders(&self, doctor_id: DoctorId) -> Vec<Order> {
        self.collect_orders(&self.by_doctor, doctor_id)
    }

    fn patient_orders(&self, patient_id: PatientId) -> Vec<Order> {
        self.collect_orders(&self.by_patient, patient_id)
    }

    fn add_order(&self, order: Order) -> Result<(), StoreError> {
        self.commit(Event::order_added(&order), || {
            if self.orders.contains_key(&order.id) {
                return Err(StoreError::AlreadyExists("order", order.id.to_string()));
            }
            Ok(())
        })
    }

    fn update_order(&self, order: &Order) -> Result<(), StoreError> {
        self.commit(Event::order_updated(order), || {
            if !self.orders.contains_key(&order.id) {
                return Err(StoreError::NotFound("order", order.id.to_string()));
            }
            Ok(())
        })
    }

    fn contains_patient(&self, id: PatientId) -> bool {
        self.patients.contains_key(&id)
    }

    fn contains_doctor(&self, id: DoctorId) -> bool {
        self.doctors.contains_key(&id)
    }

    fn contains_order(&self, id: Ulid) -> bool {
        self.orders.contains_key(&id)
    }
}
