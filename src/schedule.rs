use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl BusinessHours {
    pub fn new(open: NaiveTime, close: NaiveTime) -> Result<Self, String> {
        if open >= close {
            return Err(format!(
                "Opening time {} must be before closing time {}",
                open.format("%H:%M"),
                close.format("%H:%M")
            ));
        }
        Ok(Self { open, close })
    }
}

impl FromStr for BusinessHours {
    type Err = String;

    /// Parses `HH:MM-HH:MM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (open, close) = s
            .split_once('-')
            .ok_or_else(|| format!("Invalid business hours '{s}', expected HH:MM-HH:MM"))?;
        let parse = |raw: &str| {
            NaiveTime::parse_from_str(raw.trim(), "%H:%M")
                .map_err(|_| format!("Invalid time '{raw}' in business hours '{s}'"))
        };
        Self::new(parse(open)?, parse(close)?)
    }
}

impl fmt::Display for BusinessHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.open.format("%H:%M"),
            self.close.format("%H:%M")
        )
    }
}

/// Fixed daily grid of bookable slot start times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSchedule {
    pub weekday_hours: Option<BusinessHours>,
    pub saturday_hours: Option<BusinessHours>,
    pub sunday_hours: Option<BusinessHours>,
    pub interval_minutes: u32,
    pub capacity: u32,
}

impl SlotSchedule {
    pub const DEFAULT_INTERVAL_MINUTES: u32 = 50;
    pub const DEFAULT_CAPACITY: u32 = 2;

    pub fn new(
        weekday_hours: Option<BusinessHours>,
        saturday_hours: Option<BusinessHours>,
        sunday_hours: Option<BusinessHours>,
        interval_minutes: u32,
        capacity: u32,
    ) -> Result<Self, String> {
        if interval_minutes == 0 || interval_minutes > 24 * 60 {
            return Err(format!("Invalid slot interval of {interval_minutes} minutes"));
        }
        if capacity == 0 {
            return Err("Slot capacity must be at least 1".into());
        }
        Ok(Self {
            weekday_hours,
            saturday_hours,
            sunday_hours,
            interval_minutes,
            capacity,
        })
    }

    pub fn hours(&self, date: NaiveDate) -> Option<BusinessHours> {
        match date.weekday() {
            Weekday::Sat => self.saturday_hours,
            Weekday::Sun => self.sunday_hours,
            _ => self.weekday_hours,
        }
    }

    /// Ordered slot start times of `date`. A slot is offered only if it ends by closing time.
    pub fn slots(&self, date: NaiveDate) -> Vec<NaiveTime> {
        let Some(hours) = self.hours(date) else {
            return vec![];
        };
        let interval = Duration::minutes(i64::from(self.interval_minutes));

        let mut slots = vec![];
        let mut start = date.and_time(hours.open);
        let close = date.and_time(hours.close);
        while let Some(end) = start.checked_add_signed(interval) {
            if end > close {
                break;
            }
            slots.push(start.time());
            start = end;
        }
        slots
    }

    pub fn contains(&self, date: NaiveDate, time: NaiveTime) -> bool {
        self.slots(date).contains(&time)
    }
}

impl Default for SlotSchedule {
    fn default() -> Self {
        let hours = |open: u32, close: u32| BusinessHours {
            open: NaiveTime::from_hms_opt(open, 0, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(close, 0, 0).unwrap_or(NaiveTime::MIN),
        };
        Self {
            weekday_hours: Some(hours(8, 18)),
            saturday_hours: Some(hours(8, 17)),
            sunday_hours: None,
            interval_minutes: Self::DEFAULT_INTERVAL_MINUTES,
            capacity: Self::DEFAULT_CAPACITY,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn time(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_weekday_slots() {
        let schedule = SlotSchedule::default();
        let slots = schedule.slots(date("2025-08-20")); // Wednesday

        assert_eq!(slots.len(), 12);
        assert_eq!(slots[0], time(8, 0));
        assert_eq!(slots[1], time(8, 50));
        assert_eq!(slots[2], time(9, 40));
        assert_eq!(slots[11], time(17, 10));
        assert!(slots.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_saturday_closes_earlier() {
        let schedule = SlotSchedule::default();
        let slots = schedule.slots(date("2025-08-23"));

        assert_eq!(slots.len(), 10);
        assert_eq!(slots.last(), Some(&time(15, 30)));
    }

    #[test]
    fn test_closed_on_sunday() {
        let schedule = SlotSchedule::default();
        assert!(schedule.slots(date("2025-08-24")).is_empty());
        assert!(!schedule.contains(date("2025-08-24"), time(8, 0)));
    }

    #[test]
    fn test_contains_only_grid_times() {
        let schedule = SlotSchedule::default();
        let wednesday = date("2025-08-20");

        assert!(schedule.contains(wednesday, time(8, 50)));
        assert!(!schedule.contains(wednesday, time(9, 0)));
        assert!(!schedule.contains(wednesday, time(7, 10)));
        assert!(!schedule.contains(wednesday, time(18, 0)));
    }

    #[test]
    fn test_thirty_minute_interval() {
        let hours = "09:00-11:00".parse().unwrap();
        let schedule = SlotSchedule::new(Some(hours), None, None, 30, 1).unwrap();

        assert_eq!(
            schedule.slots(date("2025-08-20")),
            vec![time(9, 0), time(9, 30), time(10, 0), time(10, 30)]
        );
    }

    #[test_case::test_case("08:00-18:00", true)]
    #[test_case::test_case(" 08:00 - 12:30 ", true)]
    #[test_case::test_case("18:00-08:00", false)]
    #[test_case::test_case("08:00-08:00", false)]
    #[test_case::test_case("08:00", false)]
    #[test_case::test_case("8h-18h", false)]
    fn test_parse_business_hours(raw: &str, valid: bool) {
        assert_eq!(raw.parse::<BusinessHours>().is_ok(), valid);
    }

    #[test]
    fn test_last_representable_date() {
        let hours: BusinessHours = "08:00-18:00".parse().unwrap();
        let schedule = SlotSchedule::new(Some(hours), Some(hours), Some(hours), 24 * 60, 1).unwrap();
        assert!(schedule.slots(NaiveDate::MAX).is_empty());

        let schedule = SlotSchedule::new(Some(hours), Some(hours), Some(hours), 50, 1).unwrap();
        assert_eq!(schedule.slots(NaiveDate::MAX).len(), 12);
    }

    #[test]
    fn test_rejects_invalid_schedule() {
        SlotSchedule::new(None, None, None, 0, 1).unwrap_err();
        SlotSchedule::new(None, None, None, 30, 0).unwrap_err();
    }
}
