//! Configuration constants for the payroll ingester
//!
//! This module centralizes all tunable parameters and naming conventions used
//! throughout the application.

use anyhow::Result;
use std::time::Duration;

// ============================================================================
// Connection Pool Configuration
// ============================================================================

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(45);

pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Connections are recycled well before typical server-side idle limits.
pub const MAX_CONNECTION_LIFETIME: Duration = Duration::from_secs(60 * 55);

// ============================================================================
// Storage Layout
// ============================================================================

/// Year tables are named by this prefix followed by the four-digit year
pub const YEAR_TABLE_PREFIX: &str = "salaryregister";

/// The employee master registry table
pub const MASTER_TABLE: &str = "employee_master";

/// Longest identifier every supported store keeps intact; Postgres truncates beyond it
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Capacity of the bounded text type used for identity columns
pub const IDENTITY_TEXT_CAPACITY: u32 = 100;

/// Total digits of the fixed-point type used for currency columns
pub const CURRENCY_PRECISION: u8 = 15;

/// Fractional digits of the fixed-point type used for currency columns
pub const CURRENCY_SCALE: u8 = 2;

/// Number of rows returned as a sample by registry statistics
pub const REGISTRY_SAMPLE_SIZE: i64 = 5;

// ============================================================================
// Input Limits
// ============================================================================

/// Largest spreadsheet export accepted for one ingestion call
pub const MAX_SHEET_BYTES: u64 = 256 * 1024 * 1024; // 256 MB

/// Invalid `month_year` values quoted in error messages
pub const INVALID_DATE_SAMPLES: usize = 5;

// ============================================================================
// Column Names
// ============================================================================

pub const PERSON_NO: &str = "person_no";
pub const PERSONNEL_AREA: &str = "personnel_area";
pub const MONTH_YEAR: &str = "month_year";
pub const YEAR: &str = "year";
pub const FOR_PERIOD: &str = "for_period";
pub const CREATED_AT: &str = "created_at";

/// Primary key of every year table, in key order
pub const SALARY_KEY_COLUMNS: [&str; 3] = [PERSON_NO, PERSONNEL_AREA, MONTH_YEAR];

// ============================================================================
// Ingestion Policy
// ============================================================================

/// What to do with rows whose `month_year` cannot be parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidDatePolicy {
    /// Drop the offending rows and ingest the rest. Fails only if every row is invalid.
    #[default]
    Drop,
    /// Fail the whole upload if any row is invalid.
    Reject,
}

impl InvalidDatePolicy {
    /// Parse policy from string (case-insensitive)
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "drop" => Ok(InvalidDatePolicy::Drop),
            "reject" => Ok(InvalidDatePolicy::Reject),
            _ => Err(anyhow::anyhow!(
                "Unsupported invalid-date policy: {}. Supported policies: drop, reject",
                s
            )),
        }
    }
}
