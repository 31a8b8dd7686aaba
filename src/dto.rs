//! JSON shapes at the scheduler boundary. Timestamps travel as RFC 3339
//! strings; the store only ever sees milliseconds.

use serde::{Deserialize, Deserializer, Serialize};
use ulid::Ulid;

use crate::model::{Appointment, AppointmentStatus};
use crate::time::format_instant;

/// Distinguish a missing field (`None`) from an explicit `null` (`Some(None)`).
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Create request. Required fields are optional here so that their absence
/// surfaces as a validation error rather than a parse error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAppointment {
    pub professional_id: Option<String>,
    pub patient_id: Option<String>,
    pub clinic_id: Option<String>,
    #[serde(rename = "type")]
    pub appointment_type: Option<String>,
    pub start_at: Option<String>,
    pub end_at: Option<String>,
    pub status: Option<AppointmentStatus>,
}

/// Partial update over exactly the mutable fields. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentPatch {
    #[serde(default, deserialize_with = "nullable")]
    pub professional_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub patient_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub clinic_id: Option<Option<String>>,
    #[serde(rename = "type")]
    pub appointment_type: Option<String>,
    pub start_at: Option<String>,
    pub end_at: Option<String>,
    pub status: Option<AppointmentStatus>,
}

/// Listing filter as it arrives from a query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub professional_id: Option<String>,
    pub patient_id: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentDto {
    pub id: Ulid,
    pub professional_id: Option<String>,
    pub patient_id: Option<String>,
    pub clinic_id: Option<String>,
    #[serde(rename = "type")]
    pub appointment_type: String,
    pub start_at: String,
    pub end_at: String,
    pub status: AppointmentStatus,
    pub created_at: String,
}

impl From<&Appointment> for AppointmentDto {
    fn from(appt: &Appointment) -> Self {
        Self {
            id: appt.id,
            professional_id: appt.professional_id.clone(),
            patient_id: appt.patient_id.clone(),
            clinic_id: appt.clinic_id.clone(),
            appointment_type: appt.appointment_type.clone(),
            start_at: format_instant(appt.span.start),
            end_at: format_instant(appt.span.end),
            status: appt.status,
            created_at: format_instant(appt.created_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Span;
    use serde_json::json;

    #[test]
    fn patch_distinguishes_null_from_missing() {
        let patch: AppointmentPatch = serde_json::from_value(json!({
            "professionalId": null,
            "patientId": "pat-9",
            "status": "CONFIRMED",
            "createdAt": "2020-01-01T00:00:00Z",
            "id": "ignored"
        }))
        .unwrap();
        assert_eq!(patch.professional_id, Some(None));
        assert_eq!(patch.patient_id, Some(Some("pat-9".into())));
        assert_eq!(patch.clinic_id, None);
        assert_eq!(patch.status, Some(AppointmentStatus::Confirmed));
        assert_eq!(patch.start_at, None);
    }

    #[test]
    fn new_appointment_reads_type_field() {
        let req: NewAppointment = serde_json::from_value(json!({
            "professionalId": "prof-1",
            "type": "FOLLOW_UP",
            "startAt": "2026-03-02T09:00:00-03:00",
            "endAt": "2026-03-02T10:00:00-03:00"
        }))
        .unwrap();
        assert_eq!(req.appointment_type.as_deref(), Some("FOLLOW_UP"));
        assert_eq!(req.patient_id, None);
        assert_eq!(req.status, None);
    }

    #[test]
    fn dto_renders_rfc3339_and_camel_case() {
        let appt = Appointment {
            id: Ulid::new(),
            professional_id: Some("prof-1".into()),
            patient_id: None,
            clinic_id: None,
            appointment_type: "CONSULTATION".into(),
            span: Span::new(1_772_442_000_000, 1_772_445_600_000),
            status: AppointmentStatus::Scheduled,
            created_at: 1_772_442_000_000,
        };
        let value = serde_json::to_value(AppointmentDto::from(&appt)).unwrap();
        assert_eq!(value["professionalId"], "prof-1");
        assert_eq!(value["patientId"], serde_json::Value::Null);
        assert_eq!(value["type"], "CONSULTATION");
        assert_eq!(value["status"], "SCHEDULED");
        assert_eq!(value["startAt"], "2026-03-02T09:00:00.000Z");
        assert_eq!(value["endAt"], "2026-03-02T10:00:00.000Z");
        assert_eq!(value["id"], appt.id.to_string());
    }
}
