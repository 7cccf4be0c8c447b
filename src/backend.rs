use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::booking::{BookingError, BookingRequestValidator, BookingService};
use crate::clock::{Clock, SystemClock};
use crate::model::BookingView;
use crate::sql::Command;
use crate::store::Store;

/// What a command produced, before it is shaped into a wire response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Inserted,
    Deleted,
    NextBooking(Option<BookingView>),
}

/// One store, one clock, and the booking service wired over them.
/// Shared by every connection.
pub struct Backend {
    store: Arc<Store>,
    service: BookingService,
}

impl Backend {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        let validator = Arc::new(BookingRequestValidator::new(store.clone(), clock.clone()));
        let service = BookingService::new(store.clone(), validator, clock);
        Self { store, service }
    }

    /// Replay the log at `wal_path` and serve on the wall clock.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let store = Arc::new(Store::open(wal_path)?);
        Ok(Self::new(store, Arc::new(SystemClock)))
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn service(&self) -> &BookingService {
        &self.service
    }

    /// Run one parsed command. Registrations go straight to the store;
    /// booking commands go through the validating service.
    pub fn execute(&self, cmd: Command) -> Result<Outcome, BookingError> {
        match cmd {
            Command::RegisterClinic { id, surgery_type } => {
                self.store.register_clinic(id, surgery_type)?;
                info!("clinic {id} registered ({surgery_type:?})");
                Ok(Outcome::Inserted)
            }
            Command::RegisterPatient { id, clinic_id } => {
                self.store.register_patient(id, clinic_id)?;
                info!("patient {id} registered at clinic {clinic_id}");
                Ok(Outcome::Inserted)
            }
            Command::RegisterDoctor { id } => {
                self.store.register_doctor(id)?;
                info!("doctor {id} registered");
                Ok(Outcome::Inserted)
            }
            Command::AddBooking(request) => {
                self.service.add_booking(request)?;
                Ok(Outcome::Inserted)
            }
            Command::DeleteBooking { id } => {
                self.service.delete_booking(id)?;
                Ok(Outcome::Deleted)
            }
            Command::SelectNextBooking { patient_id } => {
                Ok(Outcome::NextBooking(self.service.get_next_booking(patient_id)?))
            }
        }
    }
}
