use crate::error::BookingError;
use clap::ValueEnum;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static! {
    static ref LEGACY_PLATE: Regex = Regex::new(r"^[A-Z]{3}-[0-9]{4}$").unwrap();
    static ref MERCOSUL_PLATE: Regex = Regex::new(r"^[A-Z]{3}[0-9][A-Z][0-9]{2}$").unwrap();
}

/// Vehicle plate format accepted by a deployment. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PlateFormat {
    /// `AAA-9999`
    #[default]
    Legacy,
    /// `AAA9A99`
    Mercosul,
}

impl PlateFormat {
    fn pattern(self) -> &'static Regex {
        match self {
            PlateFormat::Legacy => &*LEGACY_PLATE,
            PlateFormat::Mercosul => &*MERCOSUL_PLATE,
        }
    }

    pub fn example(self) -> &'static str {
        match self {
            PlateFormat::Legacy => "ABC-1234",
            PlateFormat::Mercosul => "ABC1D23",
        }
    }

    /// Returns the normalized (trimmed, upper case) plate.
    pub fn validate(self, raw: &str) -> Result<String, BookingError> {
        let plate = raw.trim().to_uppercase();
        if plate.is_empty() {
            return Err(BookingError::Validation("Plate is required".into()));
        }
        if !self.pattern().is_match(&plate) {
            return Err(BookingError::Validation(format!(
                "Invalid plate '{plate}', expected the {self} format (e.g. {})",
                self.example()
            )));
        }
        Ok(plate)
    }
}

impl fmt::Display for PlateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlateFormat::Legacy => f.write_str("legacy"),
            PlateFormat::Mercosul => f.write_str("mercosul"),
        }
    }
}
