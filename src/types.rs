use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    #[serde(rename = "agendado", alias = "scheduled")]
    Scheduled,
    #[serde(rename = "em_andamento", alias = "in_progress")]
    InProgress,
    #[serde(rename = "finalizado", alias = "completed")]
    Completed,
    #[serde(rename = "cancelado", alias = "canceled")]
    Canceled,
}

impl AppointmentStatus {
    /// Statuses that hold a seat in their slot.
    pub const OCCUPYING: [AppointmentStatus; 2] =
        [AppointmentStatus::Scheduled, AppointmentStatus::InProgress];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Canceled
        )
    }

    pub fn occupies_slot(self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Scheduled, InProgress) | (Scheduled, Canceled) | (InProgress, Completed) | (InProgress, Canceled)
        )
    }

    /// Name used for storage.
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Canceled => "canceled",
        }
    }

    /// Name used on the wire.
    pub fn label(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "agendado",
            AppointmentStatus::InProgress => "em_andamento",
            AppointmentStatus::Completed => "finalizado",
            AppointmentStatus::Canceled => "cancelado",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" | "agendado" => Ok(AppointmentStatus::Scheduled),
            "in_progress" | "em_andamento" => Ok(AppointmentStatus::InProgress),
            "completed" | "finalizado" => Ok(AppointmentStatus::Completed),
            "canceled" | "cancelado" => Ok(AppointmentStatus::Canceled),
            other => Err(format!("Unknown appointment status '{other}'")),
        }
    }
}

/// Who asks for a cancellation. Owners may only cancel while the appointment is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requester {
    Owner,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub usuario_id: Uuid,
    pub modelo_veiculo: String,
    pub cor: Option<String>,
    pub placa: String,
    pub servico_id: Uuid,
    pub servico: String,
    pub data: NaiveDate,
    #[serde(with = "hhmm")]
    pub horario: NaiveTime,
    pub observacoes: Option<String>,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn occupies(&self, date: NaiveDate, time: NaiveTime) -> bool {
        self.status.occupies_slot() && self.data == date && self.horario == time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupancy {
    pub occupied: u32,
    pub capacity: u32,
    pub available: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotOccupancy {
    #[serde(with = "hhmm")]
    pub horario: NaiveTime,
    pub ocupados: u32,
    pub capacidade: u32,
    pub disponivel: u32,
}

impl SlotOccupancy {
    pub fn new(horario: NaiveTime, occupancy: Occupancy) -> Self {
        Self {
            horario,
            ocupados: occupancy.occupied,
            capacidade: occupancy.capacity,
            disponivel: occupancy.available,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub nome: String,
    pub valor: f64,
    pub ativo: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServicePatch {
    pub nome: Option<String>,
    pub valor: Option<f64>,
    pub ativo: Option<bool>,
}

/// How a booking names its catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceRef {
    Id(Uuid),
    Name(String),
}

impl ServiceRef {
    pub fn matches(&self, service: &Service) -> bool {
        match self {
            ServiceRef::Id(id) => service.id == *id,
            ServiceRef::Name(name) => service.nome.eq_ignore_ascii_case(name.trim()),
        }
    }

    pub fn is_current(&self, appointment: &Appointment) -> bool {
        match self {
            ServiceRef::Id(id) => appointment.servico_id == *id,
            ServiceRef::Name(name) => appointment.servico.eq_ignore_ascii_case(name.trim()),
        }
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceRef::Id(id) => write!(f, "{id}"),
            ServiceRef::Name(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentDraft {
    pub modelo_veiculo: String,
    pub cor: Option<String>,
    pub placa: String,
    pub servico: ServiceRef,
    pub observacoes: Option<String>,
}

/// Field changes applied by a reschedule. `None` keeps the current value, an empty
/// string clears an optional field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentPatch {
    pub modelo_veiculo: Option<String>,
    pub cor: Option<String>,
    pub placa: Option<String>,
    pub servico: Option<ServiceRef>,
    pub observacoes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentFilter {
    pub customer_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub status: Option<AppointmentStatus>,
    pub page: u32,
    pub page_size: u32,
}

impl AppointmentFilter {
    pub const DEFAULT_PAGE_SIZE: u32 = 20;
    pub const MAX_PAGE_SIZE: u32 = 100;

    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.customer_id.map_or(true, |id| appointment.usuario_id == id)
            && self.date.map_or(true, |date| appointment.data == date)
            && self.status.map_or(true, |status| appointment.status == status)
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.page_size as usize
    }
}

impl Default for AppointmentFilter {
    fn default() -> Self {
        Self {
            customer_id: None,
            date: None,
            status: None,
            page: 1,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: usize,
}

/// `HH:MM` codec for times of day.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&time.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(D::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<NaiveTime, String> {
        let raw = raw.trim();
        NaiveTime::parse_from_str(raw, FORMAT)
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
            .map_err(|_| format!("Invalid time of day '{raw}', expected HH:MM"))
    }

    pub fn format(time: NaiveTime) -> String {
        time.format(FORMAT).to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use AppointmentStatus::*;

    #[test_case::test_case(Scheduled, InProgress, true)]
    #[test_case::test_case(Scheduled, Canceled, true)]
    #[test_case::test_case(Scheduled, Completed, false)]
    #[test_case::test_case(Scheduled, Scheduled, false)]
    #[test_case::test_case(InProgress, Completed, true)]
    #[test_case::test_case(InProgress, Canceled, true)]
    #[test_case::test_case(InProgress, Scheduled, false)]
    #[test_case::test_case(Completed, Canceled, false)]
    #[test_case::test_case(Completed, Scheduled, false)]
    #[test_case::test_case(Canceled, Scheduled, false)]
    #[test_case::test_case(Canceled, InProgress, false)]
    fn test_status_transitions(from: AppointmentStatus, to: AppointmentStatus, allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn test_terminal_statuses_release_the_slot() {
        assert!(Scheduled.occupies_slot());
        assert!(InProgress.occupies_slot());
        assert!(!Completed.occupies_slot());
        assert!(!Canceled.occupies_slot());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_string(&InProgress).unwrap(), "\"em_andamento\"");
        let status: AppointmentStatus = serde_json::from_str("\"canceled\"").unwrap();
        assert_eq!(status, Canceled);
        let status: AppointmentStatus = serde_json::from_str("\"finalizado\"").unwrap();
        assert_eq!(status, Completed);
        assert_eq!("in_progress".parse::<AppointmentStatus>().unwrap(), InProgress);
        assert!("done".parse::<AppointmentStatus>().is_err());
    }

    #[test]
    fn test_slot_occupancy_serialization() {
        let slot = SlotOccupancy {
            horario: NaiveTime::from_hms_opt(8, 50, 0).unwrap(),
            ocupados: 1,
            capacidade: 2,
            disponivel: 1,
        };
        let value = serde_json::to_value(&slot).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "horario": "08:50", "ocupados": 1, "capacidade": 2, "disponivel": 1 })
        );
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(
            hhmm::parse("09:40").unwrap(),
            NaiveTime::from_hms_opt(9, 40, 0).unwrap()
        );
        assert_eq!(
            hhmm::parse("09:40:00").unwrap(),
            NaiveTime::from_hms_opt(9, 40, 0).unwrap()
        );
        hhmm::parse("9h40").unwrap_err();
        hhmm::parse("25:00").unwrap_err();
    }

    #[test]
    fn test_filter_pagination() {
        let filter = AppointmentFilter {
            page: 3,
            page_size: 10,
            ..Default::default()
        };
        assert_eq!(filter.offset(), 20);

        let filter = AppointmentFilter {
            page: 0,
            ..Default::default()
        };
        assert_eq!(filter.offset(), 0);
    }
}
