use ulid::Ulid;

use crate::dto::{AppointmentPatch, NewAppointment};
use crate::error::SchedulerError;
use crate::limits::*;
use crate::model::*;
use crate::time::parse_instant;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// [`Span::within_limits`] with a reason attached.
pub(crate) fn validate_span(span: &Span) -> Result<(), SchedulerError> {
    if span.within_limits() {
        Ok(())
    } else if span.duration_ms() > MAX_SPAN_DURATION_MS {
        Err(SchedulerError::validation("appointment too long"))
    } else {
        Err(SchedulerError::validation("timestamp out of range"))
    }
}

/// Empty references carry no scope, same as absent ones.
pub(crate) fn normalize_ref(
    field: &str,
    value: Option<String>,
) -> Result<Option<String>, SchedulerError> {
    match value {
        Some(v) if v.is_empty() => Ok(None),
        Some(v) if v.len() > MAX_ID_LEN => Err(SchedulerError::validation(format!(
            "{field} longer than {MAX_ID_LEN} bytes"
        ))),
        other => Ok(other),
    }
}

fn validate_type(value: String) -> Result<String, SchedulerError> {
    if value.trim().is_empty() {
        return Err(SchedulerError::validation("type must not be empty"));
    }
    if value.len() > MAX_TYPE_LEN {
        return Err(SchedulerError::validation(format!(
            "type longer than {MAX_TYPE_LEN} bytes"
        )));
    }
    Ok(value)
}

/// Build a fresh record from a create request, stamping id and creation time.
pub(crate) fn new_appointment(req: NewAppointment, now: Ms) -> Result<Appointment, SchedulerError> {
    let missing: Vec<&str> = [
        ("type", req.appointment_type.is_none()),
        ("startAt", req.start_at.is_none()),
        ("endAt", req.end_at.is_none()),
    ]
    .into_iter()
    .filter_map(|(field, absent)| absent.then_some(field))
    .collect();
    let (Some(appointment_type), Some(start_at), Some(end_at)) =
        (req.appointment_type, req.start_at, req.end_at)
    else {
        return Err(SchedulerError::validation(format!(
            "missing required fields: {}",
            missing.join(", ")
        )));
    };

    let appointment_type = validate_type(appointment_type)?;
    let start = parse_instant("startAt", &start_at)?;
    let end = parse_instant("endAt", &end_at)?;
    let span = Span::try_new(start, end)
        .ok_or_else(|| SchedulerError::validation("startAt must be before endAt"))?;
    validate_span(&span)?;

    Ok(Appointment {
        id: Ulid::new(),
        professional_id: normalize_ref("professionalId", req.professional_id)?,
        patient_id: normalize_ref("patientId", req.patient_id)?,
        clinic_id: normalize_ref("clinicId", req.clinic_id)?,
        appointment_type,
        span,
        status: req.status.unwrap_or_default(),
        created_at: now,
    })
}

/// Validate each present field on its own. The effective window can only be
/// judged against the current record, which the store does atomically.
pub(crate) fn changes_from_patch(patch: AppointmentPatch) -> Result<AppointmentChanges, SchedulerError> {
    let start = patch
        .start_at
        .map(|raw| parse_instant("startAt", &raw))
        .transpose()?;
    let end = patch
        .end_at
        .map(|raw| parse_instant("endAt", &raw))
        .transpose()?;
    if let (Some(start), Some(end)) = (start, end) {
        let span = Span::try_new(start, end)
            .ok_or_else(|| SchedulerError::validation("startAt must be before endAt"))?;
        validate_span(&span)?;
    }

    Ok(AppointmentChanges {
        professional_id: patch
            .professional_id
            .map(|v| normalize_ref("professionalId", v))
            .transpose()?,
        patient_id: patch
            .patient_id
            .map(|v| normalize_ref("patientId", v))
            .transpose()?,
        clinic_id: patch
            .clinic_id
            .map(|v| normalize_ref("clinicId", v))
            .transpose()?,
        appointment_type: patch.appointment_type.map(validate_type).transpose()?,
        start,
        end,
        status: patch.status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> NewAppointment {
        NewAppointment {
            professional_id: Some("prof-1".into()),
            patient_id: Some("pat-1".into()),
            clinic_id: None,
            appointment_type: Some("CONSULTATION".into()),
            start_at: Some("2026-03-02T09:00:00Z".into()),
            end_at: Some("2026-03-02T10:00:00Z".into()),
            status: None,
        }
    }

    #[test]
    fn builds_record_with_defaults() {
        let appt = new_appointment(request(), 42).unwrap();
        assert_eq!(appt.status, AppointmentStatus::Scheduled);
        assert_eq!(appt.created_at, 42);
        assert_eq!(appt.span.duration_ms(), 3_600_000);
        assert_eq!(appt.clinic_id, None);
    }

    #[test]
    fn names_every_missing_field() {
        let req = NewAppointment {
            appointment_type: None,
            end_at: None,
            ..request()
        };
        let err = new_appointment(req, 0).unwrap_err();
        assert_eq!(err.code(), "validation_failed");
        assert_eq!(err.to_string(), "validation failed: missing required fields: type, endAt");
    }

    #[test]
    fn rejects_zero_length_and_inverted() {
        let zero = NewAppointment {
            end_at: Some("2026-03-02T09:00:00Z".into()),
            ..request()
        };
        assert!(matches!(new_appointment(zero, 0), Err(SchedulerError::Validation(_))));
        let inverted = NewAppointment {
            end_at: Some("2026-03-02T08:00:00Z".into()),
            ..request()
        };
        assert!(matches!(new_appointment(inverted, 0), Err(SchedulerError::Validation(_))));
    }

    #[test]
    fn rejects_out_of_bounds_spans() {
        let long = NewAppointment {
            end_at: Some("2026-05-02T09:00:00Z".into()),
            ..request()
        };
        assert!(matches!(new_appointment(long, 0), Err(SchedulerError::Validation(_))));
        let ancient = NewAppointment {
            start_at: Some("1969-12-31T23:00:00Z".into()),
            end_at: Some("1970-01-01T00:30:00Z".into()),
            ..request()
        };
        assert!(matches!(new_appointment(ancient, 0), Err(SchedulerError::Validation(_))));
    }

    #[test]
    fn span_reasons_follow_the_shared_limits() {
        assert!(validate_span(&Span::new(0, MAX_SPAN_DURATION_MS)).is_ok());
        let too_long = validate_span(&Span::new(0, MAX_SPAN_DURATION_MS + 1)).unwrap_err();
        assert!(matches!(too_long, SchedulerError::Validation(m) if m == "appointment too long"));
        let early = validate_span(&Span::new(-60_000, 60_000)).unwrap_err();
        assert!(matches!(early, SchedulerError::Validation(m) if m == "timestamp out of range"));
        let late = validate_span(&Span::new(MAX_VALID_TIMESTAMP_MS, MAX_VALID_TIMESTAMP_MS + 1));
        assert!(matches!(late, Err(SchedulerError::Validation(m)) if m == "timestamp out of range"));
    }

    #[test]
    fn empty_refs_are_absent_and_long_refs_rejected() {
        let req = NewAppointment {
            professional_id: Some(String::new()),
            patient_id: Some(String::new()),
            ..request()
        };
        let appt = new_appointment(req, 0).unwrap();
        assert!(appt.scopes().is_empty());

        let req = NewAppointment {
            patient_id: Some("p".repeat(MAX_ID_LEN + 1)),
            ..request()
        };
        assert!(matches!(new_appointment(req, 0), Err(SchedulerError::Validation(_))));
    }

    #[test]
    fn blank_type_rejected() {
        let req = NewAppointment {
            appointment_type: Some("   ".into()),
            ..request()
        };
        assert!(matches!(new_appointment(req, 0), Err(SchedulerError::Validation(_))));
    }

    #[test]
    fn patch_maps_onto_changes() {
        let patch = AppointmentPatch {
            professional_id: Some(None),
            patient_id: Some(Some(String::new())),
            clinic_id: Some(Some("clinic-2".into())),
            start_at: Some("2026-03-02T06:00:00-03:00".into()),
            status: Some(AppointmentStatus::Confirmed),
            ..Default::default()
        };
        let changes = changes_from_patch(patch).unwrap();
        assert_eq!(changes.professional_id, Some(None));
        assert_eq!(changes.patient_id, Some(None));
        assert_eq!(changes.clinic_id, Some(Some("clinic-2".into())));
        assert_eq!(changes.start, Some(1_772_442_000_000));
        assert_eq!(changes.end, None);
        assert_eq!(changes.appointment_type, None);
        assert_eq!(changes.status, Some(AppointmentStatus::Confirmed));
    }

    #[test]
    fn patch_rejects_bad_fields() {
        let naive = AppointmentPatch {
            end_at: Some("2026-03-02T10:00:00".into()),
            ..Default::default()
        };
        assert!(changes_from_patch(naive).is_err());

        let inverted = AppointmentPatch {
            start_at: Some("2026-03-02T10:00:00Z".into()),
            end_at: Some("2026-03-02T09:00:00Z".into()),
            ..Default::default()
        };
        assert!(changes_from_patch(inverted).is_err());

        let blank_type = AppointmentPatch {
            appointment_type: Some(String::new()),
            ..Default::default()
        };
        assert!(changes_from_patch(blank_type).is_err());
    }

    #[test]
    fn empty_patch_is_empty_changes() {
        assert!(changes_from_patch(AppointmentPatch::default()).unwrap().is_empty());
    }
}
