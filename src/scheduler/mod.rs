mod validate;

use std::sync::Arc;
use std::time::Instant;

use chrono_tz::Tz;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::dto::{AppointmentPatch, ListQuery, NewAppointment};
use crate::error::SchedulerError;
use crate::model::Appointment;
use crate::observability::{ADMISSIONS_TOTAL, ADMISSION_DURATION_SECONDS};
use crate::store::{Admission, IntervalStore, RangeQuery};
use crate::time::{day_window, parse_day};

use self::validate::{changes_from_patch, new_appointment, normalize_ref, now_ms};

/// Admission control in front of an [`IntervalStore`].
///
/// No two appointments sharing a professional or a patient may overlap in
/// time. The check and the write always happen inside one `*_exclusive` store
/// call, so concurrent callers cannot both pass the check.
pub struct Scheduler {
    store: Arc<dyn IntervalStore>,
    timezone: Tz,
}

impl Scheduler {
    /// `timezone` fixes what a calendar day means for day listings.
    pub fn new(store: Arc<dyn IntervalStore>, timezone: Tz) -> Self {
        Self { store, timezone }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub async fn create_appointment(
        &self,
        req: NewAppointment,
    ) -> Result<Appointment, SchedulerError> {
        let started = Instant::now();
        let result = self.admit_new(req).await;
        record_admission("create", &result, started);
        result
    }

    async fn admit_new(&self, req: NewAppointment) -> Result<Appointment, SchedulerError> {
        let appointment = new_appointment(req, now_ms())?;
        let id = appointment.id;
        match self
            .store
            .insert_exclusive(appointment)
            .await
            .map_err(store_failure)?
        {
            Admission::Admitted(appt) => {
                info!(
                    "created appointment {id} [{}, {}) for professional {:?} patient {:?}",
                    appt.span.start, appt.span.end, appt.professional_id, appt.patient_id
                );
                Ok(appt)
            }
            Admission::Conflict => {
                warn!("create rejected: time conflict");
                Err(SchedulerError::Conflict)
            }
            Admission::InvalidWindow => Err(SchedulerError::validation(
                "startAt must be before endAt",
            )),
        }
    }

    pub async fn update_appointment(
        &self,
        id: Ulid,
        patch: AppointmentPatch,
    ) -> Result<Appointment, SchedulerError> {
        let started = Instant::now();
        let result = self.admit_change(id, patch).await;
        record_admission("update", &result, started);
        result
    }

    async fn admit_change(
        &self,
        id: Ulid,
        patch: AppointmentPatch,
    ) -> Result<Appointment, SchedulerError> {
        // A missing record is reported before anything wrong with the patch.
        if self.store.find_by_id(id).await.map_err(store_failure)?.is_none() {
            return Err(SchedulerError::NotFound(id));
        }
        let changes = changes_from_patch(patch)?;
        match self
            .store
            .update_exclusive(id, &changes)
            .await
            .map_err(store_failure)?
        {
            None => Err(SchedulerError::NotFound(id)),
            Some(Admission::Admitted(appt)) => {
                info!("updated appointment {id}");
                Ok(appt)
            }
            Some(Admission::Conflict) => {
                warn!("update of {id} rejected: time conflict");
                Err(SchedulerError::Conflict)
            }
            Some(Admission::InvalidWindow) => Err(SchedulerError::validation(
                "resulting window must have startAt before endAt and stay within limits",
            )),
        }
    }

    /// Freeing a slot can never create a conflict, so there is no check here.
    pub async fn delete_appointment(&self, id: Ulid) -> Result<(), SchedulerError> {
        if self.store.delete(id).await.map_err(store_failure)? {
            info!("deleted appointment {id}");
            Ok(())
        } else {
            Err(SchedulerError::NotFound(id))
        }
    }

    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, SchedulerError> {
        self.store
            .find_by_id(id)
            .await
            .map_err(store_failure)?
            .ok_or(SchedulerError::NotFound(id))
    }

    /// Each filter narrows independently. With `date` this is a day listing,
    /// without it every matching appointment is returned.
    pub async fn list_appointments(
        &self,
        query: ListQuery,
    ) -> Result<Vec<Appointment>, SchedulerError> {
        let professional_id = normalize_ref("professionalId", query.professional_id)?;
        let patient_id = normalize_ref("patientId", query.patient_id)?;
        match query.date.filter(|d| !d.trim().is_empty()) {
            Some(date) => {
                self.list_appointments_for_day(
                    professional_id.as_deref(),
                    patient_id.as_deref(),
                    &date,
                )
                .await
            }
            None => {
                self.range(RangeQuery {
                    professional_id,
                    patient_id,
                    window: None,
                })
                .await
            }
        }
    }

    /// Appointments intersecting the calendar day `date` in the reference
    /// timezone, ordered by start.
    pub async fn list_appointments_for_day(
        &self,
        professional_id: Option<&str>,
        patient_id: Option<&str>,
        date: &str,
    ) -> Result<Vec<Appointment>, SchedulerError> {
        let day = parse_day(date, self.timezone)?;
        let window = day_window(day, self.timezone)?;
        self.range(RangeQuery {
            professional_id: normalize_ref("professionalId", professional_id.map(str::to_string))?,
            patient_id: normalize_ref("patientId", patient_id.map(str::to_string))?,
            window: Some(window),
        })
        .await
    }

    async fn range(&self, query: RangeQuery) -> Result<Vec<Appointment>, SchedulerError> {
        let hits = self.store.query_range(&query).await.map_err(store_failure)?;
        debug!(
            "listed {} appointments (professional {:?}, patient {:?}, window {:?})",
            hits.len(),
            query.professional_id,
            query.patient_id,
            query.window
        );
        Ok(hits)
    }
}

fn store_failure(e: crate::error::StoreError) -> SchedulerError {
    error!("store failure: {e}");
    SchedulerError::Store(e)
}

fn record_admission(
    op: &'static str,
    result: &Result<Appointment, SchedulerError>,
    started: Instant,
) {
    let outcome = match result {
        Ok(_) => "admitted",
        Err(e) => e.code(),
    };
    metrics::counter!(ADMISSIONS_TOTAL, "op" => op, "outcome" => outcome).increment(1);
    metrics::histogram!(ADMISSION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
}
