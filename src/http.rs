use crate::{
    allocator::{parse_date, parse_time},
    backend::AppointmentBackend,
    configuration::Configuration,
    error::BookingError,
    types::{
        Appointment, AppointmentDraft, AppointmentFilter, AppointmentPatch, AppointmentStatus,
        Page, Requester, Service, ServicePatch, ServiceRef, SlotOccupancy,
    },
};
use axum::{
    body::Body,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequestParts, Path, Query, Request, State,
    },
    http::{request::Parts, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, patch, post, put},
    Json, Router,
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;
use validator::{Validate, ValidationError};

pub const ADMIN_PASSWORD_HEADER: &str = "x-admin-password";
pub const CUSTOMER_ID_HEADER: &str = "x-customer-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState<T: AppointmentBackend, C: Configuration> {
    pub backend: T,
    pub configuration: C,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_service_choice"))]
struct AppointmentRequest {
    modelo_veiculo: Option<String>,
    cor: Option<String>,
    placa: Option<String>,
    servico: Option<String>,
    servico_id: Option<Uuid>,
    data: String,
    horario: String,
    observacoes: Option<String>,
}

fn validate_service_choice(request: &AppointmentRequest) -> Result<(), ValidationError> {
    if request.servico.is_some() && request.servico_id.is_some() {
        return Err(ValidationError::new("service").with_message(Cow::Borrowed(
            "Send either 'servico' or 'servico_id', not both",
        )));
    }
    Ok(())
}

impl AppointmentRequest {
    fn slot(&self) -> Result<(NaiveDate, NaiveTime), BookingError> {
        Ok((parse_date(&self.data)?, parse_time(&self.horario)?))
    }

    fn service(&self) -> Option<ServiceRef> {
        self.servico_id
            .map(ServiceRef::Id)
            .or_else(|| self.servico.clone().map(ServiceRef::Name))
    }

    fn into_draft(self) -> Result<AppointmentDraft, BookingError> {
        let servico = self.service().ok_or_else(|| {
            BookingError::Validation("Either 'servico' or 'servico_id' is required".into())
        })?;
        Ok(AppointmentDraft {
            modelo_veiculo: self.modelo_veiculo.unwrap_or_default(),
            cor: self.cor,
            placa: self.placa.unwrap_or_default(),
            servico,
            observacoes: self.observacoes,
        })
    }

    fn into_patch(self) -> AppointmentPatch {
        AppointmentPatch {
            servico: self.service(),
            modelo_veiculo: self.modelo_veiculo,
            cor: self.cor,
            placa: self.placa,
            observacoes: self.observacoes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct StatusRequest {
    status: AppointmentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct ServiceRequest {
    #[validate(length(min = 1, max = 80))]
    nome: String,
    #[validate(range(min = 0.0))]
    valor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct ServiceUpdateRequest {
    #[validate(length(min = 1, max = 80))]
    nome: Option<String>,
    #[validate(range(min = 0.0))]
    valor: Option<f64>,
    ativo: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SlotsQuery {
    #[serde(alias = "data")]
    date: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
struct AppointmentsQuery {
    #[validate(range(min = 1))]
    page: Option<u32>,
    #[validate(range(min = 1))]
    page_size: Option<u32>,
    #[serde(alias = "data")]
    date: Option<String>,
    status: Option<String>,
    usuario_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct SlotsResponse {
    data: NaiveDate,
    slots: Vec<SlotOccupancy>,
}

/// Caller identity taken from the request headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    customer_id: Option<Uuid>,
    admin: bool,
}

impl Session {
    fn customer(&self) -> Result<Uuid, BookingError> {
        self.customer_id.ok_or_else(|| {
            BookingError::Unauthorized(format!("Missing {CUSTOMER_ID_HEADER} header"))
        })
    }

    fn ensure_access(&self, appointment: &Appointment) -> Result<(), BookingError> {
        if self.admin || self.customer_id == Some(appointment.usuario_id) {
            return Ok(());
        }
        Err(BookingError::Forbidden(format!(
            "Appointment {} belongs to another customer",
            appointment.id
        )))
    }

    fn requester(&self) -> Requester {
        match self.admin {
            true => Requester::Admin,
            false => Requester::Owner,
        }
    }
}

fn admin_password_matches(header: Option<&HeaderValue>, expected: &str) -> Option<bool> {
    header.map(|value| value.to_str().map_or(false, |password| password == expected))
}

#[axum::async_trait]
impl<T, C> FromRequestParts<AppState<T, C>> for Session
where
    T: AppointmentBackend,
    C: Configuration,
{
    type Rejection = BookingError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<T, C>,
    ) -> Result<Self, Self::Rejection> {
        let admin = match admin_password_matches(
            parts.headers.get(ADMIN_PASSWORD_HEADER),
            &state.configuration.admin_password(),
        ) {
            Some(false) => return Err(BookingError::Unauthorized("Unauthorized".into())),
            Some(true) => true,
            None => false,
        };

        let customer_id = match parts.headers.get(CUSTOMER_ID_HEADER) {
            Some(value) => Some(
                value
                    .to_str()
                    .ok()
                    .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
                    .ok_or_else(|| {
                        BookingError::Unauthorized(format!("Malformed {CUSTOMER_ID_HEADER} header"))
                    })?,
            ),
            None => None,
        };

        if !admin && customer_id.is_none() {
            return Err(BookingError::Unauthorized("Missing credentials".into()));
        }
        Ok(Session { customer_id, admin })
    }
}

pub fn create_app<T: AppointmentBackend, C: Configuration>(backend: T, configuration: C) -> Router {
    let state = AppState {
        backend,
        configuration,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public = Router::new()
        .route("/slots", get(get_slots::<T, C>))
        .route("/services", get(get_services::<T, C>))
        .route(
            "/appointments",
            get(get_appointments::<T, C>).post(create_appointment::<T, C>),
        )
        .route(
            "/appointments/:id",
            get(get_appointment::<T, C>)
                .put(update_appointment::<T, C>)
                .delete(cancel_appointment::<T, C>),
        );

    let admin = Router::new()
        .route("/services", post(add_service::<T, C>))
        .route(
            "/services/:id",
            put(update_service::<T, C>).delete(remove_service::<T, C>),
        )
        .route("/appointments/:id/status", patch(update_status::<T, C>))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth::<T, C>,
        ));

    Router::new()
        .merge(public)
        .merge(admin)
        .with_state(state)
        .layer(middleware::from_fn(request_tracing))
        .layer(cors)
}

async fn admin_auth<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, BookingError> {
    match admin_password_matches(
        request.headers().get(ADMIN_PASSWORD_HEADER),
        &state.configuration.admin_password(),
    ) {
        Some(true) => Ok(next.run(request).await),
        Some(false) => Err(BookingError::Unauthorized("Unauthorized".into())),
        None => Err(BookingError::Unauthorized("Missing credentials".into())),
    }
}

async fn request_tracing(request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let route = request.uri().path().to_string();
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = info_span!(
        "http.request",
        request_id = %request_id,
        method = %method,
        route = %route,
    );

    let mut response = async move {
        let response = next.run(request).await;
        info!(status = %response.status(), "Request handled");
        response
    }
    .instrument(span)
    .await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Backends block on a mutex or a database connection, so they run off the async workers.
async fn run_blocking<R, F>(task: F) -> Result<R, BookingError>
where
    F: FnOnce() -> Result<R, BookingError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| BookingError::Storage(format!("Backend task failed: {err}")))?
}

fn rejected(rejection: impl fmt::Display) -> BookingError {
    BookingError::Validation(rejection.to_string())
}

fn json_body<T: Validate>(body: Result<Json<T>, JsonRejection>) -> Result<T, BookingError> {
    let Json(value) = body.map_err(rejected)?;
    value
        .validate()
        .map_err(|errors| BookingError::Validation(errors.to_string()))?;
    Ok(value)
}

async fn get_slots<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    query: Result<Query<SlotsQuery>, QueryRejection>,
) -> Result<Json<SlotsResponse>, BookingError> {
    let Query(query) = query.map_err(rejected)?;
    let date = query
        .date
        .ok_or_else(|| BookingError::Validation("Query parameter 'date' is required".into()))?;
    let date = parse_date(&date)?;

    let backend = state.backend;
    let slots = run_blocking(move || backend.list_slots(date)).await?;
    Ok(Json(SlotsResponse { data: date, slots }))
}

async fn get_appointments<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    session: Session,
    query: Result<Query<AppointmentsQuery>, QueryRejection>,
) -> Result<Json<Page<Appointment>>, BookingError> {
    let Query(query) = query.map_err(rejected)?;
    query
        .validate()
        .map_err(|errors| BookingError::Validation(errors.to_string()))?;

    let filter = AppointmentFilter {
        customer_id: match session.admin {
            true => query.usuario_id.or(session.customer_id),
            false => Some(session.customer()?),
        },
        date: query.date.as_deref().map(parse_date).transpose()?,
        status: query
            .status
            .as_deref()
            .map(str::parse::<AppointmentStatus>)
            .transpose()
            .map_err(BookingError::Validation)?,
        page: query.page.unwrap_or(1),
        page_size: query
            .page_size
            .unwrap_or(AppointmentFilter::DEFAULT_PAGE_SIZE)
            .min(AppointmentFilter::MAX_PAGE_SIZE),
    };

    let backend = state.backend;
    Ok(Json(run_blocking(move || backend.appointments(filter)).await?))
}

async fn create_appointment<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    session: Session,
    body: Result<Json<AppointmentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Appointment>), BookingError> {
    let customer_id = session.customer()?;
    let request = json_body(body)?;
    let (date, time) = request.slot()?;
    let draft = request.into_draft()?;

    let backend = state.backend;
    let appointment =
        run_blocking(move || backend.reserve(customer_id, date, time, draft)).await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

async fn get_appointment<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    session: Session,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Appointment>, BookingError> {
    let Path(id) = id.map_err(rejected)?;

    let backend = state.backend;
    let appointment = run_blocking(move || {
        let appointment = backend.appointment(id)?;
        session.ensure_access(&appointment)?;
        Ok(appointment)
    })
    .await?;
    Ok(Json(appointment))
}

async fn update_appointment<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    session: Session,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<AppointmentRequest>, JsonRejection>,
) -> Result<Json<Appointment>, BookingError> {
    let Path(id) = id.map_err(rejected)?;
    let request = json_body(body)?;
    let (date, time) = request.slot()?;
    let patch = request.into_patch();

    let backend = state.backend;
    let appointment = run_blocking(move || {
        session.ensure_access(&backend.appointment(id)?)?;
        backend.reschedule(id, date, time, patch)
    })
    .await?;
    Ok(Json(appointment))
}

async fn cancel_appointment<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    session: Session,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Appointment>, BookingError> {
    let Path(id) = id.map_err(rejected)?;

    let backend = state.backend;
    let appointment = run_blocking(move || {
        session.ensure_access(&backend.appointment(id)?)?;
        backend.cancel(id, session.requester())
    })
    .await?;
    Ok(Json(appointment))
}

async fn update_status<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<StatusRequest>, JsonRejection>,
) -> Result<Json<Appointment>, BookingError> {
    let Path(id) = id.map_err(rejected)?;
    let StatusRequest { status } = json_body(body)?;

    let backend = state.backend;
    Ok(Json(
        run_blocking(move || backend.update_status(id, status)).await?,
    ))
}

async fn get_services<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
) -> Result<Json<Vec<Service>>, BookingError> {
    let backend = state.backend;
    Ok(Json(run_blocking(move || backend.services()).await?))
}

async fn add_service<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    body: Result<Json<ServiceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Service>), BookingError> {
    let ServiceRequest { nome, valor } = json_body(body)?;

    let backend = state.backend;
    let service = run_blocking(move || backend.add_service(nome, valor)).await?;
    Ok((StatusCode::CREATED, Json(service)))
}

async fn update_service<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<ServiceUpdateRequest>, JsonRejection>,
) -> Result<Json<Service>, BookingError> {
    let Path(id) = id.map_err(rejected)?;
    let request = json_body(body)?;
    let patch = ServicePatch {
        nome: request.nome,
        valor: request.valor,
        ativo: request.ativo,
    };

    let backend = state.backend;
    Ok(Json(
        run_blocking(move || backend.update_service(id, patch)).await?,
    ))
}

async fn remove_service<T: AppointmentBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Service>, BookingError> {
    let Path(id) = id.map_err(rejected)?;

    let backend = state.backend;
    Ok(Json(run_blocking(move || backend.remove_service(id)).await?))
}
