use std::collections::HashMap;
use tracing::{debug, warn};

use super::registry::{Registry, TRANSFERABLE_FIELDS};
use super::Identity;
use crate::db::Record;

/// Gap-fills salary records from the employee registry
#[derive(Debug, Clone)]
pub struct Enricher {
    registry: Registry,
}

impl Enricher {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Merge `records` into the registry, then fill their missing attributes from it.
    ///
    /// A failed registry write is logged and enrichment uses whatever the
    /// registry already held. Output has the same order and length as the input.
    pub async fn enrich(&self, records: Vec<Record>) -> Vec<Record> {
        if records.is_empty() {
            return records;
        }

        if let Err(e) = self.registry.batch_upsert(&records).await {
            warn!(error = %e, "registry upsert failed, enriching from prior registry state");
        }

        let lookup = match self.registry.get_all().await {
            Ok(lookup) => lookup,
            Err(e) => {
                warn!(error = %e, "registry read failed, records pass through unenriched");
                HashMap::new()
            }
        };
        debug!(employees = lookup.len(), "loaded registry lookup");

        records
            .into_iter()
            .map(|record| fill_from_registry(record, &lookup))
            .collect()
    }
}

/// Copy transferable attributes the record lacks (absent or null) from its registry entry
fn fill_from_registry(mut record: Record, lookup: &HashMap<Identity, Record>) -> Record {
    let Some(entry) = Identity::of(&record).and_then(|identity| lookup.get(&identity)) else {
        return record;
    };

    for field in TRANSFERABLE_FIELDS {
        let Some(stored) = entry.get(field).filter(|v| !v.is_null()) else {
            continue;
        };
        let missing = record.get(field).is_none_or(|v| v.is_null());
        if missing {
            record.insert(field.to_string(), stored.clone());
        }
    }

    record
}
