//! In-memory [`Repository`] for development, demos and tests.
//!
//! Records are stored JSON-encoded, so anything that would not survive a real
//! backend fails here too.

use boxoffice_core::repository::{Repository, RepositoryError, Snapshot, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    events: HashMap<Uuid, String>,
    reservations: HashMap<Uuid, String>,
    payments: HashMap<Uuid, String>,
}

/// Repository backed by process memory.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records of every kind.
    pub async fn len(&self) -> usize {
        let tables = self.tables.read().await;
        tables.events.len() + tables.reservations.len() + tables.payments.len()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn encode<T: Serialize>(record: &T) -> Result<String, RepositoryError> {
    Ok(serde_json::to_string(record)?)
}

fn decode_all<T: DeserializeOwned>(rows: &HashMap<Uuid, String>) -> Result<Vec<T>, RepositoryError> {
    rows.values()
        .map(|row| serde_json::from_str(row).map_err(RepositoryError::from))
        .collect()
}

impl Repository for InMemoryRepository {
    fn commit(
        &self,
        batch: WriteBatch,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>> {
        Box::pin(async move {
            // Encode everything first so a bad record writes nothing.
            let events = batch
                .events
                .iter()
                .map(|e| Ok((*e.id.as_uuid(), encode(e)?)))
                .collect::<Result<Vec<_>, RepositoryError>>()?;
            let reservations = batch
                .reservations
                .iter()
                .map(|r| Ok((*r.id.as_uuid(), encode(r)?)))
                .collect::<Result<Vec<_>, RepositoryError>>()?;
            let payments = batch
                .payments
                .iter()
                .map(|p| Ok((*p.id.as_uuid(), encode(p)?)))
                .collect::<Result<Vec<_>, RepositoryError>>()?;

            let mut tables = self.tables.write().await;
            tables.events.extend(events);
            tables.reservations.extend(reservations);
            tables.payments.extend(payments);
            Ok(())
        })
    }

    fn load_snapshot(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Snapshot, RepositoryError>> + Send + '_>> {
        Box::pin(async move {
            let tables = self.tables.read().await;
            Ok(Snapshot {
                events: decode_all(&tables.events)?,
                reservations: decode_all(&tables.reservations)?,
                payments: decode_all(&tables.payments)?,
            })
        })
    }
}
