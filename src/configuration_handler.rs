use crate::{
    configuration::Configuration,
    plate::PlateFormat,
    schedule::{BusinessHours, SlotSchedule},
};
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "carwash-scheduler", about = "Car wash appointment booking service")]
pub struct ConfigurationHandler {
    /// Password expected in the `x-admin-password` header of admin requests
    #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: String,

    /// PostgreSQL URL. Appointments are kept in memory when omitted
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, env = "PORT", default_value = "3001")]
    port: String,

    /// Opening hours from Monday to Friday, `HH:MM-HH:MM`
    #[arg(long, env = "WEEKDAY_HOURS", default_value = "08:00-18:00")]
    weekday_hours: BusinessHours,

    /// Opening hours on Saturday, `HH:MM-HH:MM`
    #[arg(long, env = "SATURDAY_HOURS", default_value = "08:00-17:00")]
    saturday_hours: BusinessHours,

    /// Opening hours on Sunday, `HH:MM-HH:MM`. Closed when omitted
    #[arg(long, env = "SUNDAY_HOURS")]
    sunday_hours: Option<BusinessHours>,

    #[arg(long, env = "SLOT_INTERVAL_MINUTES", default_value_t = SlotSchedule::DEFAULT_INTERVAL_MINUTES, value_parser = clap::value_parser!(u32).range(1..=1440))]
    slot_interval_minutes: u32,

    /// Appointments bookable in parallel per slot
    #[arg(long, env = "SLOT_CAPACITY", default_value_t = SlotSchedule::DEFAULT_CAPACITY, value_parser = clap::value_parser!(u32).range(1..))]
    slot_capacity: u32,

    #[arg(long, env = "PLATE_FORMAT", value_enum, default_value_t = PlateFormat::Legacy)]
    plate_format: PlateFormat,
}

impl ConfigurationHandler {
    pub fn parse_arguments() -> Self {
        if let Err(err) = dotenvy::dotenv() {
            tracing::debug!(?err, "No .env file loaded");
        }
        Self::parse()
    }
}

impl Configuration for ConfigurationHandler {
    fn admin_password(&self) -> String {
        self.admin_password.clone()
    }

    fn database_url(&self) -> Option<String> {
        self.database_url.clone()
    }

    fn port(&self) -> String {
        self.port.clone()
    }

    fn schedule(&self) -> Result<SlotSchedule, String> {
        SlotSchedule::new(
            Some(self.weekday_hours),
            Some(self.saturday_hours),
            self.sunday_hours,
            self.slot_interval_minutes,
            self.slot_capacity,
        )
    }

    fn plate_format(&self) -> PlateFormat {
        self.plate_format
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn test_defaults() {
        let configuration =
            ConfigurationHandler::try_parse_from(["carwash-scheduler", "--admin-password", "secret"])
                .unwrap();

        assert_eq!(configuration.admin_password(), "secret");
        assert_eq!(configuration.plate_format(), PlateFormat::Legacy);
        assert_eq!(configuration.schedule().unwrap(), SlotSchedule::default());
    }

    #[test]
    fn test_explicit_arguments() {
        let configuration = ConfigurationHandler::try_parse_from([
            "carwash-scheduler",
            "--admin-password",
            "secret",
            "--database-url",
            "postgres://localhost/carwash",
            "--sunday-hours",
            "09:00-13:00",
            "--slot-interval-minutes",
            "30",
            "--slot-capacity",
            "3",
            "--plate-format",
            "mercosul",
        ])
        .unwrap();

        let schedule = configuration.schedule().unwrap();
        assert_eq!(
            configuration.database_url().as_deref(),
            Some("postgres://localhost/carwash")
        );
        assert_eq!(configuration.plate_format(), PlateFormat::Mercosul);
        assert_eq!(schedule.interval_minutes, 30);
        assert_eq!(schedule.capacity, 3);
        assert_eq!(
            schedule.sunday_hours.map(|hours| hours.open),
            NaiveTime::from_hms_opt(9, 0, 0)
        );
    }

    #[test_case::test_case(&["--weekday-hours", "18:00-08:00"])]
    #[test_case::test_case(&["--slot-capacity", "0"])]
    #[test_case::test_case(&["--slot-interval-minutes", "0"])]
    #[test_case::test_case(&["--plate-format", "european"])]
    fn test_rejects_invalid_arguments(extra: &[&str]) {
        let mut arguments = vec!["carwash-scheduler", "--admin-password", "secret"];
        arguments.extend_from_slice(extra);
        ConfigurationHandler::try_parse_from(arguments).unwrap_err();
    }
}
