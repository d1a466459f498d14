use crate::{
    allocator::SlotAllocator,
    backend::AppointmentBackend,
    clock::MockClock,
    configuration::Configuration,
    error::BookingError,
    local_appointments::LocalAppointments,
    plate::PlateFormat,
    schedule::SlotSchedule,
    types::{
        Appointment, AppointmentDraft, AppointmentFilter, AppointmentPatch, AppointmentStatus,
        Occupancy, Page, Requester, Service, ServicePatch, ServiceRef, SlotOccupancy,
    },
};
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use uuid::Uuid;

pub const ADMIN_PASSWORD: &str = "123";

/// Wednesday 2025-08-20; the test clock stands on the day before at 10:00.
pub fn wednesday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 8, 20).unwrap()
}

pub fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

pub fn draft(service_name: &str) -> AppointmentDraft {
    AppointmentDraft {
        modelo_veiculo: "Corolla 2023".into(),
        cor: Some("Prata".into()),
        placa: "ABC-1234".into(),
        servico: ServiceRef::Name(service_name.into()),
        observacoes: None,
    }
}

pub fn service(name: &str, active: bool) -> Service {
    Service {
        id: Uuid::new_v4(),
        nome: name.into(),
        valor: 50.0,
        ativo: active,
    }
}

pub fn allocator(schedule: SlotSchedule) -> SlotAllocator {
    let now = wednesday().pred_opt().unwrap().and_time(time(10, 0));
    let mut clock = MockClock::new();
    clock.expect_now().return_const(now);
    clock
        .expect_timestamp()
        .return_const(Utc.from_utc_datetime(&now));
    SlotAllocator::new(schedule, PlateFormat::Legacy, Arc::new(clock))
}

pub fn local_appointments(schedule: SlotSchedule) -> LocalAppointments {
    let backend = LocalAppointments::new(allocator(schedule));
    backend.insert_default_services().unwrap();
    backend
}

#[derive(Clone)]
pub struct TestConfiguration {
    pub schedule: SlotSchedule,
}

impl Configuration for TestConfiguration {
    fn admin_password(&self) -> String {
        ADMIN_PASSWORD.into()
    }

    fn database_url(&self) -> Option<String> {
        None
    }

    fn port(&self) -> String {
        "0".into()
    }

    fn schedule(&self) -> Result<SlotSchedule, String> {
        Ok(self.schedule.clone())
    }

    fn plate_format(&self) -> PlateFormat {
        PlateFormat::Legacy
    }
}

pub struct MockAppointmentBackendInner {
    pub success: AtomicBool,
    pub calls_to_list_slots: AtomicU64,
    pub calls_to_occupancy: AtomicU64,
    pub calls_to_reserve: AtomicU64,
    pub calls_to_reschedule: AtomicU64,
    pub calls_to_cancel: AtomicU64,
    pub calls_to_update_status: AtomicU64,
    pub calls_to_appointment: AtomicU64,
    pub calls_to_appointments: AtomicU64,
    pub calls_to_services: AtomicU64,
    pub calls_to_add_service: AtomicU64,
    pub calls_to_update_service: AtomicU64,
    pub calls_to_remove_service: AtomicU64,
    pub appointment: Mutex<Appointment>,
    pub last_filter: Mutex<Option<AppointmentFilter>>,
}

/// Records calls and answers with a canned appointment owned by `owner`.
#[derive(Clone)]
pub struct MockAppointmentBackend(pub Arc<MockAppointmentBackendInner>);

impl MockAppointmentBackendInner {
    fn new(owner: Uuid) -> Self {
        let now = Utc::now();
        Self {
            success: AtomicBool::new(true),
            calls_to_list_slots: AtomicU64::default(),
            calls_to_occupancy: AtomicU64::default(),
            calls_to_reserve: AtomicU64::default(),
            calls_to_reschedule: AtomicU64::default(),
            calls_to_cancel: AtomicU64::default(),
            calls_to_update_status: AtomicU64::default(),
            calls_to_appointment: AtomicU64::default(),
            calls_to_appointments: AtomicU64::default(),
            calls_to_services: AtomicU64::default(),
            calls_to_add_service: AtomicU64::default(),
            calls_to_update_service: AtomicU64::default(),
            calls_to_remove_service: AtomicU64::default(),
            appointment: Mutex::new(Appointment {
                id: Uuid::new_v4(),
                usuario_id: owner,
                modelo_veiculo: "Corolla 2023".into(),
                cor: None,
                placa: "ABC-1234".into(),
                servico_id: Uuid::new_v4(),
                servico: "Lavagem Express".into(),
                data: wednesday(),
                horario: time(8, 0),
                observacoes: None,
                status: AppointmentStatus::Scheduled,
                created_at: now,
                updated_at: now,
            }),
            last_filter: Mutex::default(),
        }
    }
}

impl MockAppointmentBackend {
    pub fn new(owner: Uuid) -> Self {
        Self(Arc::new(MockAppointmentBackendInner::new(owner)))
    }

    fn result<T>(&self, value: T) -> Result<T, BookingError> {
        match self.0.success.load(Ordering::SeqCst) {
            true => Ok(value),
            false => Err(BookingError::Storage("Supposed to fail".into())),
        }
    }

    fn canned(&self) -> Appointment {
        self.0.appointment.lock().unwrap().clone()
    }

    fn canned_service(&self) -> Service {
        service("Lavagem Express", true)
    }
}

impl AppointmentBackend for MockAppointmentBackend {
    fn list_slots(&self, _date: NaiveDate) -> Result<Vec<SlotOccupancy>, BookingError> {
        self.0.calls_to_list_slots.fetch_add(1, Ordering::SeqCst);
        let occupancy = Occupancy {
            occupied: 1,
            capacity: 2,
            available: 1,
        };
        self.result(vec![SlotOccupancy::new(time(8, 0), occupancy)])
    }

    fn occupancy(&self, _date: NaiveDate, _time: NaiveTime) -> Result<Occupancy, BookingError> {
        self.0.calls_to_occupancy.fetch_add(1, Ordering::SeqCst);
        self.result(Occupancy {
            occupied: 1,
            capacity: 2,
            available: 1,
        })
    }

    fn reserve(
        &self,
        _customer_id: Uuid,
        _date: NaiveDate,
        _time: NaiveTime,
        _draft: AppointmentDraft,
    ) -> Result<Appointment, BookingError> {
        self.0.calls_to_reserve.fetch_add(1, Ordering::SeqCst);
        self.result(self.canned())
    }

    fn reschedule(
        &self,
        _id: Uuid,
        _date: NaiveDate,
        _time: NaiveTime,
        _patch: AppointmentPatch,
    ) -> Result<Appointment, BookingError> {
        self.0.calls_to_reschedule.fetch_add(1, Ordering::SeqCst);
        self.result(self.canned())
    }

    fn cancel(&self, _id: Uuid, _requester: Requester) -> Result<Appointment, BookingError> {
        self.0.calls_to_cancel.fetch_add(1, Ordering::SeqCst);
        self.result(self.canned())
    }

    fn update_status(
        &self,
        _id: Uuid,
        _status: AppointmentStatus,
    ) -> Result<Appointment, BookingError> {
        self.0.calls_to_update_status.fetch_add(1, Ordering::SeqCst);
        self.result(self.canned())
    }

    fn appointment(&self, _id: Uuid) -> Result<Appointment, BookingError> {
        self.0.calls_to_appointment.fetch_add(1, Ordering::SeqCst);
        self.result(self.canned())
    }

    fn appointments(&self, filter: AppointmentFilter) -> Result<Page<Appointment>, BookingError> {
        self.0.calls_to_appointments.fetch_add(1, Ordering::SeqCst);
        let page = Page {
            data: vec![self.canned()],
            page: filter.page,
            page_size: filter.page_size,
            total: 1,
        };
        *self.0.last_filter.lock().unwrap() = Some(filter);
        self.result(page)
    }

    fn services(&self) -> Result<Vec<Service>, BookingError> {
        self.0.calls_to_services.fetch_add(1, Ordering::SeqCst);
        self.result(vec![self.canned_service()])
    }

    fn add_service(&self, _name: String, _price: f64) -> Result<Service, BookingError> {
        self.0.calls_to_add_service.fetch_add(1, Ordering::SeqCst);
        self.result(self.canned_service())
    }

    fn update_service(&self, _id: Uuid, _patch: ServicePatch) -> Result<Service, BookingError> {
        self.0
            .calls_to_update_service
            .fetch_add(1, Ordering::SeqCst);
        self.result(self.canned_service())
    }

    fn remove_service(&self, _id: Uuid) -> Result<Service, BookingError> {
        self.0
            .calls_to_remove_service
            .fetch_add(1, Ordering::SeqCst);
        self.result(self.canned_service())
    }
}
