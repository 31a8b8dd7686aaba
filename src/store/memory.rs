use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::error::StoreError;
use crate::model::*;

use super::{sort_by_start, unchecked_update, Admission, IntervalStore, OverlapQuery, RangeQuery};

/// Volatile store behind one table-wide lock. Every exclusive write holds the
/// write lock across check and apply, so admissions are trivially atomic.
/// Meant for tests and embedding where durability is not needed.
#[derive(Default)]
pub struct MemoryStore {
    appointments: RwLock<HashMap<Ulid, Appointment>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.appointments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.appointments.read().await.is_empty()
    }
}

fn overlaps_any<'a>(
    mut appointments: impl Iterator<Item = &'a Appointment>,
    scopes: &[Scope],
    span: &Span,
    exclude: Option<Ulid>,
) -> bool {
    if scopes.is_empty() {
        return false;
    }
    appointments.any(|a| {
        Some(a.id) != exclude && a.span.overlaps(span) && scopes.iter().any(|s| a.in_scope(s))
    })
}

fn merge(
    table: &mut HashMap<Ulid, Appointment>,
    id: Ulid,
    changes: &AppointmentChanges,
    check: bool,
) -> Option<Admission<Appointment>> {
    let current = table.get(&id)?;
    let effective = changes.effective(current);
    let Some(span) = effective.span() else {
        return Some(Admission::InvalidWindow);
    };
    if check && overlaps_any(table.values(), &effective.scopes(), &span, Some(id)) {
        return Some(Admission::Conflict);
    }
    let appt = table.get_mut(&id)?;
    changes.apply(appt);
    Some(Admission::Admitted(appt.clone()))
}

#[async_trait]
impl IntervalStore for MemoryStore {
    async fn insert(&self, appointment: Appointment) -> Result<Ulid, StoreError> {
        let id = appointment.id;
        self.appointments.write().await.insert(id, appointment);
        Ok(id)
    }

    async fn find_by_id(&self, id: Ulid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.appointments.read().await.get(&id).cloned())
    }

    async fn update(
        &self,
        id: Ulid,
        changes: &AppointmentChanges,
    ) -> Result<Option<Appointment>, StoreError> {
        let mut table = self.appointments.write().await;
        unchecked_update(merge(&mut table, id, changes, false))
    }

    async fn delete(&self, id: Ulid) -> Result<bool, StoreError> {
        Ok(self.appointments.write().await.remove(&id).is_some())
    }

    async fn query_overlap(&self, query: &OverlapQuery) -> Result<bool, StoreError> {
        let table = self.appointments.read().await;
        Ok(overlaps_any(
            table.values(),
            &query.scopes(),
            &query.span,
            query.exclude,
        ))
    }

    async fn query_range(&self, query: &RangeQuery) -> Result<Vec<Appointment>, StoreError> {
        let table = self.appointments.read().await;
        let mut hits: Vec<Appointment> = table.values().filter(|a| query.matches(a)).cloned().collect();
        sort_by_start(&mut hits);
        Ok(hits)
    }

    async fn insert_exclusive(
        &self,
        appointment: Appointment,
    ) -> Result<Admission<Appointment>, StoreError> {
        let mut table = self.appointments.write().await;
        if overlaps_any(table.values(), &appointment.scopes(), &appointment.span, None) {
            return Ok(Admission::Conflict);
        }
        table.insert(appointment.id, appointment.clone());
        Ok(Admission::Admitted(appointment))
    }

    async fn update_exclusive(
        &self,
        id: Ulid,
        changes: &AppointmentChanges,
    ) -> Result<Option<Admission<Appointment>>, StoreError> {
        let mut table = self.appointments.write().await;
        Ok(merge(&mut table, id, changes, true))
    }
}
