//! Booking rules shared by every appointment backend.
//!
//! Backends own atomicity: they call into [`SlotAllocator`] while holding whatever
//! guards the slot (a mutex, a transaction-scoped lock) and only write after every
//! check passed.

use crate::{
    clock::Clock,
    error::BookingError,
    plate::PlateFormat,
    schedule::SlotSchedule,
    types::{
        hhmm, Appointment, AppointmentDraft, AppointmentPatch, AppointmentStatus, Occupancy,
        Requester, Service, ServiceRef,
    },
};
use chrono::{NaiveDate, NaiveTime};
use std::sync::Arc;
use uuid::Uuid;

pub const MAX_MODEL_LENGTH: usize = 80;
pub const MAX_COLOR_LENGTH: usize = 40;
pub const MAX_NOTES_LENGTH: usize = 500;

pub fn parse_date(raw: &str) -> Result<NaiveDate, BookingError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| BookingError::InvalidDate(format!("Invalid date '{raw}', expected YYYY-MM-DD")))
}

pub fn parse_time(raw: &str) -> Result<NaiveTime, BookingError> {
    hhmm::parse(raw).map_err(BookingError::Validation)
}

#[derive(Clone)]
pub struct SlotAllocator {
    schedule: SlotSchedule,
    plate_format: PlateFormat,
    clock: Arc<dyn Clock>,
}

impl SlotAllocator {
    pub fn new(schedule: SlotSchedule, plate_format: PlateFormat, clock: Arc<dyn Clock>) -> Self {
        Self {
            schedule,
            plate_format,
            clock,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.schedule.capacity
    }

    fn today(&self) -> NaiveDate {
        self.clock.now().date()
    }

    fn ensure_not_past(&self, date: NaiveDate) -> Result<(), BookingError> {
        if date < self.today() {
            return Err(BookingError::InvalidDate(format!("Date {date} is in the past")));
        }
        Ok(())
    }

    /// Slot start times of `date`, which must not be in the past.
    pub fn slots_for(&self, date: NaiveDate) -> Result<Vec<NaiveTime>, BookingError> {
        self.ensure_not_past(date)?;
        Ok(self.schedule.slots(date))
    }

    /// Preconditions for placing an appointment into (`date`, `time`), capacity aside.
    pub fn ensure_bookable(&self, date: NaiveDate, time: NaiveTime) -> Result<(), BookingError> {
        self.ensure_not_past(date)?;
        self.ensure_slot(date, time)?;
        if date.and_time(time) <= self.clock.now() {
            return Err(BookingError::InvalidDate(format!(
                "Slot {} on {date} has already started",
                hhmm::format(time)
            )));
        }
        Ok(())
    }

    pub fn ensure_slot(&self, date: NaiveDate, time: NaiveTime) -> Result<(), BookingError> {
        if !self.schedule.contains(date, time) {
            return Err(BookingError::InvalidSlot(format!(
                "{} is not a bookable time on {date}",
                hhmm::format(time)
            )));
        }
        Ok(())
    }

    pub fn occupancy(&self, occupied: u32) -> Occupancy {
        let capacity = self.capacity();
        Occupancy {
            occupied,
            capacity,
            available: capacity.saturating_sub(occupied),
        }
    }

    pub fn ensure_capacity(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        occupied: u32,
    ) -> Result<Occupancy, BookingError> {
        let occupancy = self.occupancy(occupied);
        if occupancy.available == 0 {
            return Err(BookingError::SlotFull {
                date: date.to_string(),
                time: hhmm::format(time),
            });
        }
        Ok(occupancy)
    }

    pub fn validate_draft(&self, draft: AppointmentDraft) -> Result<AppointmentDraft, BookingError> {
        Ok(AppointmentDraft {
            modelo_veiculo: validate_model(&draft.modelo_veiculo)?,
            cor: validate_optional(draft.cor, "Color", MAX_COLOR_LENGTH)?,
            placa: self.plate_format.validate(&draft.placa)?,
            servico: validate_service_ref(draft.servico)?,
            observacoes: validate_optional(draft.observacoes, "Notes", MAX_NOTES_LENGTH)?,
        })
    }

    pub fn validate_patch(&self, patch: AppointmentPatch) -> Result<AppointmentPatch, BookingError> {
        Ok(AppointmentPatch {
            modelo_veiculo: patch
                .modelo_veiculo
                .map(|model| validate_model(&model))
                .transpose()?,
            cor: patch
                .cor
                .map(|color| validate_text(color, "Color", MAX_COLOR_LENGTH))
                .transpose()?,
            placa: patch
                .placa
                .map(|plate| self.plate_format.validate(&plate))
                .transpose()?,
            servico: patch.servico.map(validate_service_ref).transpose()?,
            observacoes: patch
                .observacoes
                .map(|notes| validate_text(notes, "Notes", MAX_NOTES_LENGTH))
                .transpose()?,
        })
    }

    /// Decides whether a reschedule moves the appointment to another slot.
    ///
    /// Keeping the current slot skips every slot check: the appointment already holds
    /// its seat there.
    pub fn plan_reschedule(
        &self,
        current: &Appointment,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<bool, BookingError> {
        if current.status != AppointmentStatus::Scheduled {
            return Err(BookingError::NotEditable(current.status.to_string()));
        }
        if current.data == date && current.horario == time {
            return Ok(false);
        }
        self.ensure_bookable(date, time)?;
        Ok(true)
    }

    pub fn new_appointment(
        &self,
        customer_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        draft: AppointmentDraft,
        service: &Service,
    ) -> Appointment {
        let now = self.clock.timestamp();
        Appointment {
            id: Uuid::new_v4(),
            usuario_id: customer_id,
            modelo_veiculo: draft.modelo_veiculo,
            cor: draft.cor,
            placa: draft.placa,
            servico_id: service.id,
            servico: service.nome.clone(),
            data: date,
            horario: time,
            observacoes: draft.observacoes,
            status: AppointmentStatus::Scheduled,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies an already validated patch and a new slot to `appointment`.
    pub fn apply_patch(
        &self,
        appointment: &mut Appointment,
        date: NaiveDate,
        time: NaiveTime,
        patch: AppointmentPatch,
        service: Option<&Service>,
    ) {
        if let Some(model) = patch.modelo_veiculo {
            appointment.modelo_veiculo = model;
        }
        if let Some(color) = patch.cor {
            appointment.cor = non_empty(color);
        }
        if let Some(plate) = patch.placa {
            appointment.placa = plate;
        }
        if let Some(service) = service {
            appointment.servico_id = service.id;
            appointment.servico = service.nome.clone();
        }
        if let Some(notes) = patch.observacoes {
            appointment.observacoes = non_empty(notes);
        }
        appointment.data = date;
        appointment.horario = time;
        appointment.updated_at = self.clock.timestamp();
    }

    /// Moves `appointment` to `next` if the status machine allows it.
    pub fn transition(
        &self,
        appointment: &mut Appointment,
        next: AppointmentStatus,
    ) -> Result<(), BookingError> {
        if !appointment.status.can_transition_to(next) {
            return Err(BookingError::InvalidTransition {
                from: appointment.status.to_string(),
                to: next.to_string(),
            });
        }
        appointment.status = next;
        appointment.updated_at = self.clock.timestamp();
        Ok(())
    }

    /// Cancels `appointment`. Returns `false` when it was already canceled.
    pub fn cancel(
        &self,
        appointment: &mut Appointment,
        requester: Requester,
    ) -> Result<bool, BookingError> {
        match appointment.status {
            AppointmentStatus::Canceled => Ok(false),
            AppointmentStatus::InProgress | AppointmentStatus::Completed
                if requester == Requester::Owner =>
            {
                Err(BookingError::NotEditable(appointment.status.to_string()))
            }
            _ => {
                self.transition(appointment, AppointmentStatus::Canceled)?;
                Ok(true)
            }
        }
    }
}

/// Looks up a bookable catalog entry.
pub fn resolve_service<'a>(
    services: impl IntoIterator<Item = &'a Service>,
    reference: &ServiceRef,
) -> Result<&'a Service, BookingError> {
    let service = services
        .into_iter()
        .find(|service| reference.matches(service))
        .ok_or_else(|| BookingError::Validation(format!("Unknown service '{reference}'")))?;
    if !service.ativo {
        return Err(BookingError::Validation(format!(
            "Service '{}' is not available",
            service.nome
        )));
    }
    Ok(service)
}

pub fn validate_service_name(name: &str) -> Result<String, BookingError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(BookingError::Validation("Service name is required".into()));
    }
    Ok(name.to_string())
}

pub fn validate_price(price: f64) -> Result<f64, BookingError> {
    if !price.is_finite() || price < 0.0 {
        return Err(BookingError::Validation(format!("Invalid price {price}")));
    }
    Ok(price)
}

fn validate_model(model: &str) -> Result<String, BookingError> {
    let model = model.trim();
    if model.is_empty() {
        return Err(BookingError::Validation("Vehicle model is required".into()));
    }
    if model.chars().count() > MAX_MODEL_LENGTH {
        return Err(BookingError::Validation(format!(
            "Vehicle model exceeds {MAX_MODEL_LENGTH} characters"
        )));
    }
    Ok(model.to_string())
}

fn validate_text(text: String, field: &str, max: usize) -> Result<String, BookingError> {
    let text = text.trim();
    if text.chars().count() > max {
        return Err(BookingError::Validation(format!(
            "{field} exceeds {max} characters"
        )));
    }
    Ok(text.to_string())
}

fn validate_optional(
    text: Option<String>,
    field: &str,
    max: usize,
) -> Result<Option<String>, BookingError> {
    Ok(text
        .map(|text| validate_text(text, field, max))
        .transpose()?
        .and_then(non_empty))
}

fn validate_service_ref(reference: ServiceRef) -> Result<ServiceRef, BookingError> {
    match reference {
        ServiceRef::Name(name) => Ok(ServiceRef::Name(validate_service_name(&name)?)),
        id => Ok(id),
    }
}

fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}
