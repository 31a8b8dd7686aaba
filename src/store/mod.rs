mod memory;
mod wal_store;
mod writer;

pub use memory::MemoryStore;
pub use wal_store::WalStore;

use async_trait::async_trait;
use ulid::Ulid;

use crate::error::StoreError;
use crate::model::*;

/// Outcome of an atomic admission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission<T> {
    Admitted(T),
    /// Another appointment in a shared scope overlaps the window. Nothing was written.
    Conflict,
    /// The effective window after the merge is empty or inverted. Nothing was written.
    InvalidWindow,
}

/// Overlap check: is any stored appointment, other than `exclude`, in the
/// professional scope **or** the patient scope and intersecting `span`?
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapQuery {
    pub professional_id: Option<String>,
    pub patient_id: Option<String>,
    pub span: Span,
    pub exclude: Option<Ulid>,
}

impl OverlapQuery {
    pub fn scopes(&self) -> Vec<Scope> {
        Scope::of(self.professional_id.as_deref(), self.patient_id.as_deref())
    }
}

/// Listing filter. Each field narrows independently; `window: None` is unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeQuery {
    pub professional_id: Option<String>,
    pub patient_id: Option<String>,
    pub window: Option<Span>,
}

impl RangeQuery {
    pub fn matches(&self, appt: &Appointment) -> bool {
        let professional_ok = self
            .professional_id
            .as_ref()
            .is_none_or(|p| appt.professional_id.as_ref() == Some(p));
        let patient_ok = self
            .patient_id
            .as_ref()
            .is_none_or(|p| appt.patient_id.as_ref() == Some(p));
        let window_ok = self.window.is_none_or(|w| w.overlaps(&appt.span));
        professional_ok && patient_ok && window_ok
    }
}

/// Order listings by start, ties broken by id (creation order for ULIDs).
pub(crate) fn sort_by_start(appts: &mut [Appointment]) {
    appts.sort_by(|a, b| a.span.start.cmp(&b.span.start).then(a.id.cmp(&b.id)));
}

/// Durable appointment collection with an overlap-query primitive.
///
/// The store knows nothing about the scheduling invariant except through the
/// `*_exclusive` methods, which run the overlap test and the write as one
/// atomic unit. Plain `insert`/`update` never check overlap.
#[async_trait]
pub trait IntervalStore: Send + Sync {
    async fn insert(&self, appointment: Appointment) -> Result<Ulid, StoreError>;

    async fn find_by_id(&self, id: Ulid) -> Result<Option<Appointment>, StoreError>;

    /// Partial merge; `None` if `id` does not exist.
    async fn update(
        &self,
        id: Ulid,
        changes: &AppointmentChanges,
    ) -> Result<Option<Appointment>, StoreError>;

    /// `false` if `id` does not exist.
    async fn delete(&self, id: Ulid) -> Result<bool, StoreError>;

    /// Unscoped queries (no professional, no patient) never overlap anything.
    async fn query_overlap(&self, query: &OverlapQuery) -> Result<bool, StoreError>;

    /// Matching appointments ordered by `span.start` ascending.
    async fn query_range(&self, query: &RangeQuery) -> Result<Vec<Appointment>, StoreError>;

    /// Overlap check for the appointment's own scopes, then insert, atomically.
    async fn insert_exclusive(
        &self,
        appointment: Appointment,
    ) -> Result<Admission<Appointment>, StoreError>;

    /// Read current, overlay `changes`, check the effective window and scopes
    /// against everything but `id`, then apply, atomically. `None` if `id`
    /// does not exist.
    async fn update_exclusive(
        &self,
        id: Ulid,
        changes: &AppointmentChanges,
    ) -> Result<Option<Admission<Appointment>>, StoreError>;
}

/// Unwrap an unchecked update: without the overlap check the only possible
/// rejection is an invalid window.
pub(crate) fn unchecked_update(
    outcome: Option<Admission<Appointment>>,
) -> Result<Option<Appointment>, StoreError> {
    match outcome {
        None => Ok(None),
        Some(Admission::Admitted(appt)) => Ok(Some(appt)),
        Some(Admission::Conflict) | Some(Admission::InvalidWindow) => {
            Err(StoreError::Rejected("update leaves an invalid window"))
        }
    }
}
