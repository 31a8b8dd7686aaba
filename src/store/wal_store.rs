use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::error::StoreError;
use crate::limits::WAL_CHANNEL_CAPACITY;
use crate::model::*;
use crate::observability::APPOINTMENTS_ACTIVE;
use crate::wal::Wal;

use super::writer::{run_wal_writer, WalCommand};
use super::{sort_by_start, unchecked_update, Admission, IntervalStore, OverlapQuery, RangeQuery};

pub type SharedAppointment = Arc<RwLock<Appointment>>;
pub type SharedLane = Arc<RwLock<Lane>>;

type LockedLanes = Vec<(Scope, OwnedRwLockWriteGuard<Lane>)>;

/// Durable store: in-memory indexes rebuilt from a group-committed WAL.
///
/// Lock order, always: compaction gate (shared) → one appointment → scope
/// lanes sorted by `Scope`. Writers that share a scope serialize on its lane,
/// which makes check-then-write atomic; writers on disjoint scopes run in
/// parallel. Reads never take the gate.
pub struct WalStore {
    appointments: DashMap<Ulid, SharedAppointment>,
    lanes: DashMap<Scope, SharedLane>,
    gate: RwLock<()>,
    wal_tx: mpsc::Sender<WalCommand>,
    path: PathBuf,
}

impl WalStore {
    /// Replay the log at `path` and start its writer task. Must run inside a
    /// tokio runtime.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let (wal, events) = Wal::open(path)?;
        let replayed = events.len();
        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(run_wal_writer(wal, wal_rx));

        // Fold the log into final state first so replay never touches a lock.
        let mut live: BTreeMap<Ulid, Appointment> = BTreeMap::new();
        for event in events {
            match event {
                Event::AppointmentCreated { appointment }
                | Event::AppointmentUpdated { appointment } => {
                    live.insert(appointment.id, appointment);
                }
                Event::AppointmentDeleted { id } => {
                    live.remove(&id);
                }
            }
        }

        let mut lanes: BTreeMap<Scope, Lane> = BTreeMap::new();
        for appt in live.values() {
            for scope in appt.scopes() {
                lanes.entry(scope).or_default().insert(LaneEntry {
                    id: appt.id,
                    span: appt.span,
                });
            }
        }

        let store = Self {
            appointments: live
                .into_iter()
                .map(|(id, appt)| (id, Arc::new(RwLock::new(appt))))
                .collect(),
            lanes: lanes
                .into_iter()
                .map(|(scope, lane)| (scope, Arc::new(RwLock::new(lane))))
                .collect(),
            gate: RwLock::new(()),
            wal_tx,
            path: path.to_path_buf(),
        };
        info!(
            "opened {} ({replayed} events replayed, {} appointments, {} lanes)",
            path.display(),
            store.appointments.len(),
            store.lanes.len()
        );
        store.record_active();
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appointment_count(&self) -> usize {
        self.appointments.len()
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    fn record_active(&self) {
        metrics::gauge!(APPOINTMENTS_ACTIVE).set(self.appointments.len() as f64);
    }

    fn get_appointment(&self, id: &Ulid) -> Option<SharedAppointment> {
        self.appointments.get(id).map(|e| e.value().clone())
    }

    fn get_lane(&self, scope: &Scope) -> Option<SharedLane> {
        self.lanes.get(scope).map(|e| e.value().clone())
    }

    /// A deleted appointment is unlinked while its lock is held, so a waiter
    /// that wins the lock afterwards must confirm it is still the live entry.
    fn is_live(&self, id: &Ulid, slot: &SharedAppointment) -> bool {
        self.appointments
            .get(id)
            .is_some_and(|e| Arc::ptr_eq(e.value(), slot))
    }

    /// Write-lock the lanes of `scopes` in sorted order, creating missing
    /// lanes. Callers hold the gate shared, and lanes are only dropped under
    /// the exclusive gate, so two writers can never hold different lanes for
    /// one scope.
    async fn lock_lanes(&self, mut scopes: Vec<Scope>) -> LockedLanes {
        scopes.sort();
        scopes.dedup();
        let mut locked = Vec::with_capacity(scopes.len());
        for scope in scopes {
            let lane = self.lanes.entry(scope.clone()).or_default().value().clone();
            locked.push((scope, lane.write_owned().await));
        }
        locked
    }

    /// Send one event through the group-commit writer and wait for fsync.
    async fn wal_append(&self, event: Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { event, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    async fn create(
        &self,
        appointment: Appointment,
        check: bool,
    ) -> Result<Admission<Appointment>, StoreError> {
        let _gate = self.gate.read().await;
        let mut lanes = self.lock_lanes(appointment.scopes()).await;
        if check
            && lanes
                .iter()
                .any(|(_, lane)| lane.conflicts(&appointment.span, None))
        {
            return Ok(Admission::Conflict);
        }

        self.wal_append(Event::AppointmentCreated {
            appointment: appointment.clone(),
        })
        .await?;

        let entry = LaneEntry {
            id: appointment.id,
            span: appointment.span,
        };
        for (_, lane) in lanes.iter_mut() {
            lane.insert(entry);
        }
        self.appointments
            .insert(appointment.id, Arc::new(RwLock::new(appointment.clone())));
        self.record_active();
        Ok(Admission::Admitted(appointment))
    }

    async fn modify(
        &self,
        id: Ulid,
        changes: &AppointmentChanges,
        check: bool,
    ) -> Result<Option<Admission<Appointment>>, StoreError> {
        let _gate = self.gate.read().await;
        let Some(slot) = self.get_appointment(&id) else {
            return Ok(None);
        };
        let mut current = slot.clone().write_owned().await;
        if !self.is_live(&id, &slot) {
            return Ok(None);
        }

        let effective = changes.effective(&current);
        let Some(span) = effective.span() else {
            return Ok(Some(Admission::InvalidWindow));
        };
        let target_scopes = effective.scopes();

        // Lock the lanes being left as well as the ones being entered.
        let mut scopes = current.scopes();
        scopes.extend(target_scopes.iter().cloned());
        let mut lanes = self.lock_lanes(scopes).await;

        if check
            && lanes
                .iter()
                .filter(|(scope, _)| target_scopes.contains(scope))
                .any(|(_, lane)| lane.conflicts(&span, Some(id)))
        {
            return Ok(Some(Admission::Conflict));
        }

        let mut next = current.clone();
        changes.apply(&mut next);
        self.wal_append(Event::AppointmentUpdated {
            appointment: next.clone(),
        })
        .await?;

        for (scope, lane) in lanes.iter_mut() {
            lane.remove(id);
            if next.in_scope(scope) {
                lane.insert(LaneEntry { id, span: next.span });
            }
        }
        *current = next.clone();
        Ok(Some(Admission::Admitted(next)))
    }

    /// Rewrite the WAL as one `AppointmentCreated` per live appointment and
    /// drop empty lanes. Holds the gate exclusively so no write can slip
    /// between the snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let _gate = self.gate.write().await;
        // No writer holds a lane guard here; readers only ever read-lock.
        let lanes_before = self.lanes.len();
        self.lanes
            .retain(|_, lane| lane.try_read().map_or(true, |lane| !lane.is_empty()));
        debug!("dropped {} empty lanes", lanes_before - self.lanes.len());

        let slots: Vec<SharedAppointment> =
            self.appointments.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::with_capacity(slots.len());
        for slot in slots {
            events.push(Event::AppointmentCreated {
                appointment: slot.read().await.clone(),
            });
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl IntervalStore for WalStore {
    async fn insert(&self, appointment: Appointment) -> Result<Ulid, StoreError> {
        let id = appointment.id;
        self.create(appointment, false).await?;
        Ok(id)
    }

    async fn find_by_id(&self, id: Ulid) -> Result<Option<Appointment>, StoreError> {
        let Some(slot) = self.get_appointment(&id) else {
            return Ok(None);
        };
        let appt = slot.read().await.clone();
        Ok(Some(appt))
    }

    async fn update(
        &self,
        id: Ulid,
        changes: &AppointmentChanges,
    ) -> Result<Option<Appointment>, StoreError> {
        unchecked_update(self.modify(id, changes, false).await?)
    }

    async fn delete(&self, id: Ulid) -> Result<bool, StoreError> {
        let _gate = self.gate.read().await;
        let Some(slot) = self.get_appointment(&id) else {
            return Ok(false);
        };
        let current = slot.clone().write_owned().await;
        if !self.is_live(&id, &slot) {
            return Ok(false);
        }
        let mut lanes = self.lock_lanes(current.scopes()).await;

        self.wal_append(Event::AppointmentDeleted { id }).await?;

        for (_, lane) in lanes.iter_mut() {
            lane.remove(id);
        }
        self.appointments.remove(&id);
        self.record_active();
        Ok(true)
    }

    async fn query_overlap(&self, query: &OverlapQuery) -> Result<bool, StoreError> {
        for scope in query.scopes() {
            let Some(lane) = self.get_lane(&scope) else {
                continue;
            };
            if lane.read().await.conflicts(&query.span, query.exclude) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn query_range(&self, query: &RangeQuery) -> Result<Vec<Appointment>, StoreError> {
        // Narrow through the most selective lane available, then filter.
        let scope = match (&query.professional_id, &query.patient_id) {
            (Some(p), _) => Some(Scope::Professional(p.clone())),
            (None, Some(p)) => Some(Scope::Patient(p.clone())),
            (None, None) => None,
        };
        let ids: Vec<Ulid> = match scope {
            Some(scope) => match self.get_lane(&scope) {
                Some(lane) => {
                    let lane = lane.read().await;
                    match &query.window {
                        Some(window) => lane.overlapping(window).map(|e| e.id).collect(),
                        None => lane.entries.iter().map(|e| e.id).collect(),
                    }
                }
                None => Vec::new(),
            },
            None => self.appointments.iter().map(|e| *e.key()).collect(),
        };

        let mut hits = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(slot) = self.get_appointment(&id) else {
                continue;
            };
            let appt = slot.read().await.clone();
            if query.matches(&appt) {
                hits.push(appt);
            }
        }
        sort_by_start(&mut hits);
        debug!("range query matched {} appointments", hits.len());
        Ok(hits)
    }

    async fn insert_exclusive(
        &self,
        appointment: Appointment,
    ) -> Result<Admission<Appointment>, StoreError> {
        self.create(appointment, true).await
    }

    async fn update_exclusive(
        &self,
        id: Ulid,
        changes: &AppointmentChanges,
    ) -> Result<Option<Admission<Appointment>>, StoreError> {
        self.modify(id, changes, true).await
    }
}
