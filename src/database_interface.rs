use crate::{
    allocator::{
        resolve_service, validate_price, validate_service_name, SlotAllocator,
    },
    backend::AppointmentBackend,
    error::BookingError,
    schema::{appointments, services},
    types::{
        hhmm, Appointment, AppointmentDraft, AppointmentFilter, AppointmentPatch,
        AppointmentStatus, Occupancy, Page, Requester, Service, ServicePatch, SlotOccupancy,
    },
};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike, Utc};
use diesel::{
    pg::Pg,
    result::{DatabaseErrorKind, Error as DieselError},
    sql_types::BigInt, Connection, ConnectionError,
    ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, QueryResult, RunQueryDsl,
    SelectableHelper,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = appointments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
struct AppointmentRow {
    id: Uuid,
    customer_id: Uuid,
    vehicle_model: String,
    vehicle_color: Option<String>,
    plate: String,
    service_id: Uuid,
    service_name: String,
    slot_date: NaiveDate,
    slot_time: NaiveTime,
    notes: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Appointment> for AppointmentRow {
    fn from(appointment: &Appointment) -> Self {
        Self {
            id: appointment.id,
            customer_id: appointment.usuario_id,
            vehicle_model: appointment.modelo_veiculo.clone(),
            vehicle_color: appointment.cor.clone(),
            plate: appointment.placa.clone(),
            service_id: appointment.servico_id,
            service_name: appointment.servico.clone(),
            slot_date: appointment.data,
            slot_time: appointment.horario,
            notes: appointment.observacoes.clone(),
            status: appointment.status.as_str().into(),
            created_at: appointment.created_at,
            updated_at: appointment.updated_at,
        }
    }
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = BookingError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            usuario_id: row.customer_id,
            modelo_veiculo: row.vehicle_model,
            cor: row.vehicle_color,
            placa: row.plate,
            servico_id: row.service_id,
            servico: row.service_name,
            data: row.slot_date,
            horario: row.slot_time,
            observacoes: row.notes,
            status: row.status.parse().map_err(BookingError::Storage)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = services)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct ServiceRow {
    id: Uuid,
    name: String,
    price: f64,
    active: bool,
}

impl From<ServiceRow> for Service {
    fn from(row: ServiceRow) -> Self {
        Self {
            id: row.id,
            nome: row.name,
            valor: row.price,
            ativo: row.active,
        }
    }
}

impl From<DieselError> for BookingError {
    fn from(err: DieselError) -> Self {
        error!(?err, "Database operation failed");
        BookingError::Storage(err.to_string())
    }
}

/// Reports a lost race on the unique service name like the up-front duplicate check does.
fn service_write_error(err: DieselError, name: &str) -> BookingError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            BookingError::Validation(format!("Service '{name}' already exists"))
        }
        err => err.into(),
    }
}

/// Advisory lock key of one slot: day number times minutes per day plus minute of day.
fn slot_key(date: NaiveDate, time: NaiveTime) -> i64 {
    i64::from(date.num_days_from_ce()) * 1440 + i64::from(time.num_seconds_from_midnight() / 60)
}

/// Serializes every writer of (`date`, `time`) until the surrounding transaction ends.
fn lock_slot(conn: &mut PgConnection, date: NaiveDate, time: NaiveTime) -> QueryResult<()> {
    diesel::sql_query("SELECT pg_advisory_xact_lock($1)")
        .bind::<BigInt, _>(slot_key(date, time))
        .execute(conn)?;
    Ok(())
}

fn occupying_statuses() -> Vec<&'static str> {
    AppointmentStatus::OCCUPYING
        .iter()
        .map(|status| status.as_str())
        .collect()
}

fn count_occupied(
    conn: &mut PgConnection,
    date: NaiveDate,
    time: NaiveTime,
    excluded: Option<Uuid>,
) -> QueryResult<u32> {
    let count: i64 = appointments::table
        .filter(appointments::slot_date.eq(date))
        .filter(appointments::slot_time.eq(time))
        .filter(appointments::status.eq_any(occupying_statuses()))
        .filter(appointments::id.ne(excluded.unwrap_or(Uuid::nil())))
        .count()
        .get_result(conn)?;
    Ok(count as u32)
}

fn load_for_update(conn: &mut PgConnection, id: Uuid) -> Result<Appointment, BookingError> {
    appointments::table
        .find(id)
        .select(AppointmentRow::as_select())
        .for_update()
        .first(conn)
        .optional()?
        .ok_or_else(|| BookingError::NotFound(format!("Appointment {id}")))?
        .try_into()
}

fn store(conn: &mut PgConnection, appointment: &Appointment) -> QueryResult<()> {
    diesel::update(appointments::table.find(appointment.id))
        .set(AppointmentRow::from(appointment))
        .execute(conn)?;
    Ok(())
}

fn load_services(conn: &mut PgConnection) -> QueryResult<Vec<Service>> {
    Ok(services::table
        .select(ServiceRow::as_select())
        .order(services::name.asc())
        .load(conn)?
        .into_iter()
        .map(Service::from)
        .collect())
}

fn filtered(filter: &AppointmentFilter) -> appointments::BoxedQuery<'static, Pg> {
    let mut query = appointments::table.into_boxed();
    if let Some(customer_id) = filter.customer_id {
        query = query.filter(appointments::customer_id.eq(customer_id));
    }
    if let Some(date) = filter.date {
        query = query.filter(appointments::slot_date.eq(date));
    }
    if let Some(status) = filter.status {
        query = query.filter(appointments::status.eq(status.as_str()));
    }
    query
}

fn ensure_unique_name(
    catalog: &[Service],
    name: &str,
    own_id: Option<Uuid>,
) -> Result<(), BookingError> {
    if catalog
        .iter()
        .any(|service| Some(service.id) != own_id && service.nome.eq_ignore_ascii_case(name))
    {
        return Err(BookingError::Validation(format!(
            "Service '{name}' already exists"
        )));
    }
    Ok(())
}

/// PostgreSQL appointments. Each mutation is one transaction; writers of a slot are
/// serialized by a transaction-scoped advisory lock on that slot.
#[derive(Clone)]
pub struct DatabaseInterface {
    connection: Arc<Mutex<PgConnection>>,
    allocator: SlotAllocator,
}

impl DatabaseInterface {
    pub fn new(database_url: &str, allocator: SlotAllocator) -> Result<Self, ConnectionError> {
        let connection = Self::establish_connection(database_url)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            allocator,
        })
    }

    fn establish_connection(database_url: &str) -> Result<PgConnection, ConnectionError> {
        PgConnection::establish(database_url)
    }

    fn connection(&self) -> Result<MutexGuard<'_, PgConnection>, BookingError> {
        self.connection
            .lock()
            .map_err(|_| BookingError::Storage("Database connection is poisoned".into()))
    }
}

impl AppointmentBackend for DatabaseInterface {
    fn list_slots(&self, date: NaiveDate) -> Result<Vec<SlotOccupancy>, BookingError> {
        let times = self.allocator.slots_for(date)?;
        let mut connection = self.connection()?;

        let booked: Vec<NaiveTime> = appointments::table
            .filter(appointments::slot_date.eq(date))
            .filter(appointments::status.eq_any(occupying_statuses()))
            .select(appointments::slot_time)
            .load(&mut *connection)?;

        Ok(times
            .into_iter()
            .map(|time| {
                let occupied = booked.iter().filter(|booked| **booked == time).count() as u32;
                SlotOccupancy::new(time, self.allocator.occupancy(occupied))
            })
            .collect())
    }

    fn occupancy(&self, date: NaiveDate, time: NaiveTime) -> Result<Occupancy, BookingError> {
        self.allocator.ensure_slot(date, time)?;
        let occupied = count_occupied(&mut *self.connection()?, date, time, None)?;
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

        let appointment = self
            .connection()?
            .transaction::<_, BookingError, _>(|conn| {
                lock_slot(conn, date, time)?;
                let catalog = load_services(conn)?;
                let service = resolve_service(&catalog, &draft.servico)?.clone();
                let occupied = count_occupied(conn, date, time, None)?;
                self.allocator.ensure_capacity(date, time, occupied)?;

                let appointment =
                    self.allocator
                        .new_appointment(customer_id, date, time, draft, &service);
                diesel::insert_into(appointments::table)
                    .values(AppointmentRow::from(&appointment))
                    .execute(conn)?;
                Ok(appointment)
            })?;

        info!(id = %appointment.id, %date, time = %hhmm::format(time), "Appointment reserved");
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

        let (appointment, moved) = self
            .connection()?
            .transaction::<_, BookingError, _>(|conn| {
                let mut appointment = load_for_update(conn, id)?;
                let moves = self.allocator.plan_reschedule(&appointment, date, time)?;
                if moves {
                    lock_slot(conn, date, time)?;
                    let occupied = count_occupied(conn, date, time, Some(id))?;
                    self.allocator.ensure_capacity(date, time, occupied)?;
                }
                let service = match &patch.servico {
                    Some(reference) if !reference.is_current(&appointment) => {
                        let catalog = load_services(conn)?;
                        Some(resolve_service(&catalog, reference)?.clone())
                    }
                    _ => None,
                };

                self.allocator
                    .apply_patch(&mut appointment, date, time, patch, service.as_ref());
                store(conn, &appointment)?;
                Ok((appointment, moves))
            })?;

        info!(%id, %date, time = %hhmm::format(time), moved, "Appointment rescheduled");
        Ok(appointment)
    }

    fn cancel(&self, id: Uuid, requester: Requester) -> Result<Appointment, BookingError> {
        self.connection()?
            .transaction::<_, BookingError, _>(|conn| {
                let mut appointment = load_for_update(conn, id)?;
                if !self.allocator.cancel(&mut appointment, requester)? {
                    info!(%id, "Appointment was already canceled");
                    return Ok(appointment);
                }
                store(conn, &appointment)?;

                info!(%id, ?requester, "Appointment canceled");
                Ok(appointment)
            })
    }

    fn update_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Appointment, BookingError> {
        self.connection()?
            .transaction::<_, BookingError, _>(|conn| {
                let mut appointment = load_for_update(conn, id)?;
                self.allocator.transition(&mut appointment, status)?;
                store(conn, &appointment)?;

                info!(%id, %status, "Appointment status changed");
                Ok(appointment)
            })
    }

    fn appointment(&self, id: Uuid) -> Result<Appointment, BookingError> {
        appointments::table
            .find(id)
            .select(AppointmentRow::as_select())
            .first(&mut *self.connection()?)
            .optional()?
            .ok_or_else(|| BookingError::NotFound(format!("Appointment {id}")))?
            .try_into()
    }

    fn appointments(&self, filter: AppointmentFilter) -> Result<Page<Appointment>, BookingError> {
        let mut connection = self.connection()?;

        let total: i64 = filtered(&filter).count().get_result(&mut *connection)?;
        let rows: Vec<AppointmentRow> = filtered(&filter)
            .order((
                appointments::slot_date.asc(),
                appointments::slot_time.asc(),
                appointments::created_at.asc(),
            ))
            .offset(filter.offset() as i64)
            .limit(i64::from(filter.page_size))
            .load(&mut *connection)?;

        Ok(Page {
            data: rows
                .into_iter()
                .map(Appointment::try_from)
                .collect::<Result<_, _>>()?,
            page: filter.page,
            page_size: filter.page_size,
            total: total as usize,
        })
    }

    fn services(&self) -> Result<Vec<Service>, BookingError> {
        Ok(load_services(&mut *self.connection()?)?)
    }

    fn add_service(&self, name: String, price: f64) -> Result<Service, BookingError> {
        let name = validate_service_name(&name)?;
        let price = validate_price(price)?;

        self.connection()?
            .transaction::<_, BookingError, _>(|conn| {
                ensure_unique_name(&load_services(conn)?, &name, None)?;
                let row = ServiceRow {
                    id: Uuid::new_v4(),
                    name,
                    price,
                    active: true,
                };
                diesel::insert_into(services::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(|err| service_write_error(err, &row.name))?;
                Ok(Service::from(row))
            })
    }

    fn update_service(&self, id: Uuid, patch: ServicePatch) -> Result<Service, BookingError> {
        let name = patch.nome.as_deref().map(validate_service_name).transpose()?;
        let price = patch.valor.map(validate_price).transpose()?;

        self.connection()?
            .transaction::<_, BookingError, _>(|conn| {
                let catalog = load_services(conn)?;
                let mut service = catalog
                    .iter()
                    .find(|service| service.id == id)
                    .cloned()
                    .ok_or_else(|| BookingError::NotFound(format!("Service {id}")))?;
                if let Some(name) = name {
                    ensure_unique_name(&catalog, &name, Some(id))?;
                    service.nome = name;
                }
                if let Some(price) = price {
                    service.valor = price;
                }
                if let Some(active) = patch.ativo {
                    service.ativo = active;
                }

                diesel::update(services::table.find(id))
                    .set((
                        services::name.eq(&service.nome),
                        services::price.eq(service.valor),
                        services::active.eq(service.ativo),
                    ))
                    .execute(conn)
                    .map_err(|err| service_write_error(err, &service.nome))?;
                Ok(service)
            })
    }

    fn remove_service(&self, id: Uuid) -> Result<Service, BookingError> {
        let row: Option<ServiceRow> = diesel::update(services::table.find(id))
            .set(services::active.eq(false))
            .returning(ServiceRow::as_returning())
            .get_result(&mut *self.connection()?)
            .optional()?;

        row.map(Service::from)
            .ok_or_else(|| BookingError::NotFound(format!("Service {id}")))
    }
}
