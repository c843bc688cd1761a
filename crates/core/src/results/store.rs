//! Result store trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use super::types::{check_key, check_write, ResultError, ResultRecord};

/// Tenant-scoped storage of processing outcomes.
///
/// Writes to the same key are serialized and checked against the status
/// lifecycle. Reads and writes on different keys do not wait on each other.
pub trait ResultStore: Send + Sync {
    /// Returns the name of this store implementation.
    fn name(&self) -> &str;

    fn get(&self, tenant_id: &str, conversation_id: &str)
        -> Result<Option<ResultRecord>, ResultError>;

    /// Write `record` under `(tenant_id, conversation_id)`, replacing the
    /// current record if the lifecycle allows it.
    fn put(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        record: ResultRecord,
    ) -> Result<(), ResultError>;

    /// All records of a tenant, ordered by conversation id.
    fn list(&self, tenant_id: &str) -> Result<Vec<ResultRecord>, ResultError>;
}

type Slot = Arc<Mutex<ResultRecord>>;

/// Result store held in process memory.
///
/// The outer map lock is held only to find or insert a key; each record has
/// its own lock for the read-check-write of a put.
#[derive(Default)]
pub struct MemoryResultStore {
    tenants: RwLock<HashMap<String, HashMap<String, Slot>>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, tenant_id: &str, conversation_id: &str) -> Result<Option<Slot>, ResultError> {
        let tenants = self
            .tenants
            .read()
            .map_err(|e| ResultError::Storage(e.to_string()))?;
        Ok(tenants
            .get(tenant_id)
            .and_then(|records| records.get(conversation_id))
            .cloned())
    }
}

fn write_slot(slot: &Slot, record: ResultRecord) -> Result<(), ResultError> {
    let mut current = slot
        .lock()
        .map_err(|e| ResultError::Storage(e.to_string()))?;
    check_write(Some(&current), &record)?;
    *current = record;
    Ok(())
}

impl ResultStore for MemoryResultStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(
        &self,
        tenant_id: &str,
        conversation_id: &str,
    ) -> Result<Option<ResultRecord>, ResultError> {
        let Some(slot) = self.slot(tenant_id, conversation_id)? else {
            return Ok(None);
        };
        let record = slot
            .lock()
            .map_err(|e| ResultError::Storage(e.to_string()))?;
        Ok(Some(record.clone()))
    }

    fn put(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        record: ResultRecord,
    ) -> Result<(), ResultError> {
        check_key(tenant_id, conversation_id, &record)?;

        if let Some(slot) = self.slot(tenant_id, conversation_id)? {
            return write_slot(&slot, record);
        }

        let slot = {
            let mut tenants = self
                .tenants
                .write()
                .map_err(|e| ResultError::Storage(e.to_string()))?;
            let records = tenants.entry(tenant_id.to_string()).or_default();
            match records.get(conversation_id) {
                // Inserted by a concurrent put since the read above.
                Some(slot) => Arc::clone(slot),
                None => {
                    check_write(None, &record)?;
                    records.insert(conversation_id.to_string(), Arc::new(Mutex::new(record)));
                    return Ok(());
                }
            }
        };
        write_slot(&slot, record)
    }

    fn list(&self, tenant_id: &str) -> Result<Vec<ResultRecord>, ResultError> {
        let slots: Vec<Slot> = {
            let tenants = self
                .tenants
                .read()
                .map_err(|e| ResultError::Storage(e.to_string()))?;
            tenants
                .get(tenant_id)
                .map(|records| records.values().cloned().collect())
                .unwrap_or_default()
        };

        let mut records = slots
            .iter()
            .map(|slot| {
                slot.lock()
                    .map(|record| record.clone())
                    .map_err(|e| ResultError::Storage(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by(|a, b| a.conversation_id.cmp(&b.conversation_id));
        Ok(records)
    }
}
