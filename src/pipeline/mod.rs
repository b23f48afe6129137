//! Ingestion pipeline - registry upsert, enrichment and partitioned writes

pub mod enrich;
pub mod ingest;
pub mod registry;
pub mod writer;

use crate::config::{PERSON_NO, PERSONNEL_AREA};
use crate::db::{Record, Value};

pub use enrich::Enricher;
pub use ingest::{IngestReport, Ingestor, YearReport, YearStatus};
pub use registry::{CleanupReport, Registry, RegistryStats};
pub use writer::PartitionedWriter;

/// A rectangular batch of normalized records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    /// Canonical column names in source order
    pub columns: Vec<String>,
    pub records: Vec<Record>,
}

/// Employee identity: (person_no, personnel_area)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    pub person_no: String,
    pub personnel_area: String,
}

impl Identity {
    pub fn new(person_no: impl Into<String>, personnel_area: impl Into<String>) -> Self {
        Self {
            person_no: person_no.into(),
            personnel_area: personnel_area.into(),
        }
    }

    /// Extract the identity of a record; `None` if either part is missing or blank
    pub fn of(record: &Record) -> Option<Self> {
        let person_no = record.get(PERSON_NO)?.as_identity_part()?;
        let personnel_area = record.get(PERSONNEL_AREA)?.as_identity_part()?;
        Some(Self::new(person_no, personnel_area))
    }

    /// Overwrite the identity fields of `record` with their normalized form
    pub fn stamp(&self, record: &mut Record) {
        record.insert(PERSON_NO.to_string(), Value::from(self.person_no.as_str()));
        record.insert(
            PERSONNEL_AREA.to_string(),
            Value::from(self.personnel_area.as_str()),
        );
    }
}
