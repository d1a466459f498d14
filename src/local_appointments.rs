use crate::{
    allocator::{
        resolve_service, validate_price, validate_service_name, SlotAllocator,
    },
    backend::AppointmentBackend,
    error::BookingError,
    types::{
        hhmm, Appointment, AppointmentDraft, AppointmentFilter, AppointmentPatch,
        AppointmentStatus, Occupancy, Page, Requester, Service, ServicePatch, SlotOccupancy,
    },
};
use chrono::{NaiveDate, NaiveTime};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_SERVICES: [(&str, f64); 4] = [
    ("Lavagem Express", 40.0),
    ("Lavagem Completa", 70.0),
    ("Higienização Interna", 120.0),
    ("Polimento Cristalizado", 180.0),
];

#[derive(Debug, Default)]
struct Ledger {
    appointments: HashMap<Uuid, Appointment>,
    services: Vec<Service>,
}

impl Ledger {
    fn occupied(&self, date: NaiveDate, time: NaiveTime, excluded: Option<Uuid>) -> u32 {
        self.appointments
            .values()
            .filter(|appointment| Some(appointment.id) != excluded)
            .filter(|appointment| appointment.occupies(date, time))
            .count() as u32
    }

    fn ensure_unique_name(&self, name: &str, own_id: Option<Uuid>) -> Result<(), BookingError> {
        let taken = self
            .services
            .iter()
            .any(|service| Some(service.id) != own_id && service.nome.eq_ignore_ascii_case(name));
        if taken {
            return Err(BookingError::Validation(format!(
                "Service '{name}' already exists"
            )));
        }
        Ok(())
    }
}

/// In-memory appointments. Every operation runs under one lock acquisition, which makes
/// check-then-write atomic across all slots.
#[derive(Clone)]
pub struct LocalAppointments {
    ledger: Arc<Mutex<Ledger>>,
    allocator: SlotAllocator,
}

impl LocalAppointments {
    pub fn new(allocator: SlotAllocator) -> Self {
        Self {
            ledger: Arc::default(),
            allocator,
        }
    }

    pub fn insert_default_services(&self) -> Result<(), BookingError> {
        for (name, price) in DEFAULT_SERVICES {
            self.add_service(name.into(), price)?;
        }
        Ok(())
    }

    fn ledger(&self) -> Result<MutexGuard<'_, Ledger>, BookingError> {
        self.ledger
            .lock()
            .map_err(|_| BookingError::Storage("Appointment ledger is poisoned".into()))
    }
}

fn appointment_not_found(id: Uuid) -> BookingError {
    BookingError::NotFound(format!("Appointment {id}"))
}

fn service_not_found(id: Uuid) -> BookingError {
    BookingError::NotFound(format!("Service {id}"))
}

impl AppointmentBackend for LocalAppointments {
    fn list_slots(&self, date: NaiveDate) -> Result<Vec<SlotOccupancy>, BookingError> {
        let times = self.allocator.slots_for(date)?;
        let ledger = self.ledger()?;

        Ok(times
            .into_iter()
            .map(|time| {
                let occupancy = self.allocator.occupancy(ledger.occupied(date, time, None));
                SlotOccupancy::new(time, occupancy)
            })
            .collect())
    }

    fn occupancy(&self, date: NaiveDate, time: NaiveTime) -> Result<Occupancy, BookingError> {
        self.allocator.ensure_slot(date, time)?;
        let occupied = self.ledger()?.occupied(date, time, None);
        Ok(self.allocator.occupancy(occupied))
    }

    fn reserve(
        &self,
        customer_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        draft: AppointmentDraft,
    ) -> Result<Appointment, BookingError> {
        self.allocator.ensure_bookable(date, time)?;
        let draft = self.allocator.validate_draft(draft)?;

        let mut ledger = self.ledger()?;
        let service = resolve_service(&ledger.services, &draft.servico)?.clone();
        let occupancy =
            self.allocator
                .ensure_capacity(date, time, ledger.occupied(date, time, None))?;

        let appointment = self
            .allocator
            .new_appointment(customer_id, date, time, draft, &service);
        ledger
            .appointments
            .insert(appointment.id, appointment.clone());

        info!(
            id = %appointment.id,
            %date,
            time = %hhmm::format(time),
            remaining = occupancy.available - 1,
            "Appointment reserved"
        );
        Ok(appointment)
    }

    fn reschedule(
        &self,
        id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        patch: AppointmentPatch,
    ) -> Result<Appointment, BookingError> {
        let patch = self.allocator.validate_patch(patch)?;

        let mut ledger = self.ledger()?;
        let current = ledger
            .appointments
            .get(&id)
            .ok_or_else(|| appointment_not_found(id))?;
        let moves = self.allocator.plan_reschedule(current, date, time)?;
        if moves {
            self.allocator
                .ensure_capacity(date, time, ledger.occupied(date, time, Some(id)))?;
        }
        let service = match &patch.servico {
            Some(reference) if !reference.is_current(current) => {
                Some(resolve_service(&ledger.services, reference)?.clone())
            }
            _ => None,
        };

        let appointment = ledger
            .appointments
            .get_mut(&id)
            .ok_or_else(|| appointment_not_found(id))?;
        self.allocator
            .apply_patch(appointment, date, time, patch, service.as_ref());

        info!(%id, %date, time = %hhmm::format(time), moved = moves, "Appointment rescheduled");
        Ok(appointment.clone())
    }

    fn cancel(&self, id: Uuid, requester: Requester) -> Result<Appointment, BookingError> {
        let mut ledger = self.ledger()?;
        let appointment = ledger
            .appointments
            .get_mut(&id)
            .ok_or_else(|| appointment_not_found(id))?;

        match self.allocator.cancel(appointment, requester)? {
            true => info!(%id, ?requester, "Appointment canceled"),
            false => info!(%id, "Appointment was already canceled"),
        }
        Ok(appointment.clone())
    }

    fn update_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Appointment, BookingError> {
        let mut ledger = self.ledger()?;
        let appointment = ledger
            .appointments
            .get_mut(&id)
            .ok_or_else(|| appointment_not_found(id))?;
        self.allocator.transition(appointment, status)?;

        info!(%id, %status, "Appointment status changed");
        Ok(appointment.clone())
    }

    fn appointment(&self, id: Uuid) -> Result<Appointment, BookingError> {
        self.ledger()?
            .appointments
            .get(&id)
            .cloned()
            .ok_or_else(|| appointment_not_found(id))
    }

    fn appointments(&self, filter: AppointmentFilter) -> Result<Page<Appointment>, BookingError> {
        let mut appointments: Vec<Appointment> = self
            .ledger()?
            .appointments
            .values()
            .filter(|appointment| filter.matches(appointment))
            .cloned()
            .collect();
        appointments.sort_unstable_by_key(|a| (a.data, a.horario, a.created_at));

        let total = appointments.len();
        let data = appointments
            .into_iter()
            .skip(filter.offset())
            .take(filter.page_size as usize)
            .collect();
        Ok(Page {
            data,
            page: filter.page,
            page_size: filter.page_size,
            total,
        })
    }

    fn services(&self) -> Result<Vec<Service>, BookingError> {
        let mut services = self.ledger()?.services.clone();
        services.sort_by(|a, b| a.nome.cmp(&b.nome));
        Ok(services)
    }

    fn add_service(&self, name: String, price: f64) -> Result<Service, BookingError> {
        let name = validate_service_name(&name)?;
        let price = validate_price(price)?;

        let mut ledger = self.ledger()?;
        ledger.ensure_unique_name(&name, None)?;
        let service = Service {
            id: Uuid::new_v4(),
            nome: name,
            valor: price,
            ativo: true,
        };
        ledger.services.push(service.clone());
        Ok(service)
    }

    fn update_service(&self, id: Uuid, patch: ServicePatch) -> Result<Service, BookingError> {
        let name = patch.nome.as_deref().map(validate_service_name).transpose()?;
        let price = patch.valor.map(validate_price).transpose()?;

        let mut ledger = self.ledger()?;
        if let Some(name) = &name {
            ledger.ensure_unique_name(name, Some(id))?;
        }
        let service = ledger
            .services
            .iter_mut()
            .find(|service| service.id == id)
            .ok_or_else(|| service_not_found(id))?;
        if let Some(name) = name {
            service.nome = name;
        }
        if let Some(price) = price {
            service.valor = price;
        }
        if let Some(active) = patch.ativo {
            service.ativo = active;
        }
        Ok(service.clone())
    }

    fn remove_service(&self, id: Uuid) -> Result<Service, BookingError> {
        let mut ledger = self.ledger()?;
        let service = ledger
            .services
            .iter_mut()
            .find(|service| service.id == id)
            .ok_or_else(|| service_not_found(id))?;
        service.ativo = false;
        Ok(service.clone())
    }
}
