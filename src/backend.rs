use crate::{
    error::BookingError,
    types::{
        Appointment, AppointmentDraft, AppointmentFilter, AppointmentPatch, AppointmentStatus,
        Occupancy, Page, Requester, Service, ServicePatch, SlotOccupancy,
    },
};
use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

/// Storage of appointments and the service catalog.
///
/// Every mutating call is atomic: a failed call leaves appointments and occupancy exactly
/// as they were, and concurrent calls against one slot never overbook it.
pub trait AppointmentBackend: Clone + Send + Sync + 'static {
    fn list_slots(&self, date: NaiveDate) -> Result<Vec<SlotOccupancy>, BookingError>;
    fn occupancy(&self, date: NaiveDate, time: NaiveTime) -> Result<Occupancy, BookingError>;
    fn reserve(
        &self,
        customer_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        draft: AppointmentDraft,
    ) -> Result<Appointment, BookingError>;
    fn reschedule(
        &self,
        id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        patch: AppointmentPatch,
    ) -> Result<Appointment, BookingError>;
    /// Canceling an already canceled appointment returns it unchanged. The status seen by
    /// the requester rule is read under the same lock as the write.
    fn cancel(&self, id: Uuid, requester: Requester) -> Result<Appointment, BookingError>;
    fn update_status(&self, id: Uuid, status: AppointmentStatus)
        -> Result<Appointment, BookingError>;
    fn appointment(&self, id: Uuid) -> Result<Appointment, BookingError>;
    fn appointments(&self, filter: AppointmentFilter) -> Result<Page<Appointment>, BookingError>;

    fn services(&self) -> Result<Vec<Service>, BookingError>;
    fn add_service(&self, name: String, price: f64) -> Result<Service, BookingError>;
    fn update_service(&self, id: Uuid, patch: ServicePatch) -> Result<Service, BookingError>;
    /// Deactivates the service; existing appointments keep referencing it.
    fn remove_service(&self, id: Uuid) -> Result<Service, BookingError>;
}
