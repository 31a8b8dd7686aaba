use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::{MAX_SPAN_DURATION_MS, MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS};

/// Unix milliseconds. The only time type inside the store.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor: `None` for zero-length or inverted windows.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn within_limits(&self) -> bool {
        self.start >= MIN_VALID_TIMESTAMP_MS
            && self.end <= MAX_VALID_TIMESTAMP_MS
            && self.duration_ms() <= MAX_SPAN_DURATION_MS
    }
}

/// A conflict domain. Appointments sharing a scope may not overlap.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    Professional(String),
    Patient(String),
}

impl Scope {
    /// Scopes for an optional professional / patient pair, in lock order.
    pub fn of(professional_id: Option<&str>, patient_id: Option<&str>) -> Vec<Scope> {
        let mut scopes = Vec::with_capacity(2);
        if let Some(p) = professional_id {
            scopes.push(Scope::Professional(p.to_string()));
        }
        if let Some(p) = patient_id {
            scopes.push(Scope::Patient(p.to_string()));
        }
        scopes
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    #[default]
    Scheduled,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "SCHEDULED",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::InProgress => "IN_PROGRESS",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::NoShow => "NO_SHOW",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(AppointmentStatus::Scheduled),
            "CONFIRMED" => Ok(AppointmentStatus::Confirmed),
            "IN_PROGRESS" => Ok(AppointmentStatus::InProgress),
            "COMPLETED" => Ok(AppointmentStatus::Completed),
            "CANCELLED" => Ok(AppointmentStatus::Cancelled),
            "NO_SHOW" => Ok(AppointmentStatus::NoShow),
            other => Err(format!("unknown appointment status: {other}")),
        }
    }
}

/// A stored appointment. This is also the WAL payload, so it must stay
/// bincode-friendly (no skipped or flattened fields).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub professional_id: Option<String>,
    pub patient_id: Option<String>,
    pub clinic_id: Option<String>,
    pub appointment_type: String,
    pub span: Span,
    pub status: AppointmentStatus,
    pub created_at: Ms,
}

impl Appointment {
    pub fn scopes(&self) -> Vec<Scope> {
        Scope::of(self.professional_id.as_deref(), self.patient_id.as_deref())
    }

    pub fn in_scope(&self, scope: &Scope) -> bool {
        match scope {
            Scope::Professional(p) => self.professional_id.as_deref() == Some(p.as_str()),
            Scope::Patient(p) => self.patient_id.as_deref() == Some(p.as_str()),
        }
    }
}

/// A validated partial update over the closed set of mutable fields.
///
/// Outer `None` means "leave as is". For the nullable references the inner
/// `None` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentChanges {
    pub professional_id: Option<Option<String>>,
    pub patient_id: Option<Option<String>>,
    pub clinic_id: Option<Option<String>>,
    pub appointment_type: Option<String>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub status: Option<AppointmentStatus>,
}

/// The conflict-relevant values an appointment will hold after a partial update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveWindow {
    pub professional_id: Option<String>,
    pub patient_id: Option<String>,
    pub start: Ms,
    pub end: Ms,
}

impl EffectiveWindow {
    /// `None` when the window is empty, inverted or outside the limits.
    pub fn span(&self) -> Option<Span> {
        Span::try_new(self.start, self.end).filter(Span::within_limits)
    }

    pub fn scopes(&self) -> Vec<Scope> {
        Scope::of(self.professional_id.as_deref(), self.patient_id.as_deref())
    }
}

impl AppointmentChanges {
    pub fn is_empty(&self) -> bool {
        *self == AppointmentChanges::default()
    }

    /// Overlay the changes on `current`, keeping every untouched value.
    pub fn effective(&self, current: &Appointment) -> EffectiveWindow {
        EffectiveWindow {
            professional_id: self
                .professional_id
                .clone()
                .unwrap_or_else(|| current.professional_id.clone()),
            patient_id: self
                .patient_id
                .clone()
                .unwrap_or_else(|| current.patient_id.clone()),
            start: self.start.unwrap_or(current.span.start),
            end: self.end.unwrap_or(current.span.end),
        }
    }

    /// Partial merge. Caller must have validated the effective window.
    pub fn apply(&self, target: &mut Appointment) {
        if let Some(v) = &self.professional_id {
            target.professional_id = v.clone();
        }
        if let Some(v) = &self.patient_id {
            target.patient_id = v.clone();
        }
        if let Some(v) = &self.clinic_id {
            target.clinic_id = v.clone();
        }
        if let Some(v) = &self.appointment_type {
            target.appointment_type = v.clone();
        }
        let start = self.start.unwrap_or(target.span.start);
        let end = self.end.unwrap_or(target.span.end);
        target.span = Span::new(start, end);
        if let Some(v) = self.status {
            target.status = v;
        }
    }
}

/// One appointment's footprint inside a scope lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneEntry {
    pub id: Ulid,
    pub span: Span,
}

/// Every appointment interval of a single scope, sorted by `span.start`.
#[derive(Debug, Clone, Default)]
pub struct Lane {
    pub entries: Vec<LaneEntry>,
}

impl Lane {
    /// Insert entry maintaining sort order by span.start.
    pub fn insert(&mut self, entry: LaneEntry) {
        let pos = self
            .entries
            .binary_search_by_key(&entry.span.start, |e| e.span.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, entry);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<LaneEntry> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    /// Entries whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &LaneEntry> {
        let right_bound = self.entries.partition_point(|e| e.span.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.span.end > query.start)
    }

    pub fn conflicts(&self, span: &Span, exclude: Option<Ulid>) -> bool {
        self.overlapping(span).any(|e| Some(e.id) != exclude)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// WAL record format. Updates carry the full post-image so replay never
/// needs to re-run the merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AppointmentCreated { appointment: Appointment },
    AppointmentUpdated { appointment: Appointment },
    AppointmentDeleted { id: Ulid },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appointment(professional: Option<&str>, patient: Option<&str>, start: Ms, end: Ms) -> Appointment {
        Appointment {
            id: Ulid::new(),
            professional_id: professional.map(String::from),
            patient_id: patient.map(String::from),
            clinic_id: None,
            appointment_type: "CONSULTATION".into(),
            span: Span::new(start, end),
            status: AppointmentStatus::Scheduled,
            created_at: 0,
        }
    }

    fn entry(start: Ms, end: Ms) -> LaneEntry {
        LaneEntry {
            id: Ulid::new(),
            span: Span::new(start, end),
        }
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // touching, not overlapping
    }

    #[test]
    fn span_overlap_is_symmetric() {
        let spans = [
            Span::new(0, 10),
            Span::new(5, 15),
            Span::new(10, 20),
            Span::new(2, 3),
            Span::new(-5, 0),
            Span::new(0, 100),
        ];
        for a in &spans {
            for b in &spans {
                assert_eq!(a.overlaps(b), b.overlaps(a), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn span_try_new_rejects_empty_and_inverted() {
        assert!(Span::try_new(100, 100).is_none());
        assert!(Span::try_new(200, 100).is_none());
        assert_eq!(Span::try_new(100, 101), Some(Span::new(100, 101)));
    }

    #[test]
    fn span_limits() {
        assert!(Span::new(0, MAX_SPAN_DURATION_MS).within_limits());
        assert!(!Span::new(0, MAX_SPAN_DURATION_MS + 1).within_limits());
        assert!(!Span::new(-1, 100).within_limits());
        assert!(!Span::new(MAX_VALID_TIMESTAMP_MS, MAX_VALID_TIMESTAMP_MS + 1).within_limits());
    }

    #[test]
    fn scopes_follow_lock_order() {
        let mut scopes = Scope::of(Some("p"), Some("a"));
        let expected = scopes.clone();
        scopes.sort();
        assert_eq!(scopes, expected);
        assert!(Scope::of(None, None).is_empty());
    }

    #[test]
    fn status_string_forms_agree_with_serde() {
        for status in [
            AppointmentStatus::Scheduled,
            AppointmentStatus::Confirmed,
            AppointmentStatus::InProgress,
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<AppointmentStatus>().unwrap(), status);
        }
        assert!("BOOKED".parse::<AppointmentStatus>().is_err());
    }

    #[test]
    fn effective_window_overlays_changes() {
        let current = appointment(Some("prof"), Some("pat"), 100, 200);

        let status_only = AppointmentChanges {
            status: Some(AppointmentStatus::Confirmed),
            ..Default::default()
        };
        let eff = status_only.effective(&current);
        assert_eq!(eff.professional_id.as_deref(), Some("prof"));
        assert_eq!(eff.patient_id.as_deref(), Some("pat"));
        assert_eq!(eff.span(), Some(current.span));

        let moved = AppointmentChanges {
            professional_id: Some(None),
            end: Some(300),
            ..Default::default()
        };
        let eff = moved.effective(&current);
        assert_eq!(eff.professional_id, None);
        assert_eq!(eff.span(), Some(Span::new(100, 300)));
        assert_eq!(eff.scopes(), vec![Scope::Patient("pat".into())]);

        let inverted = AppointmentChanges {
            start: Some(250),
            ..Default::default()
        };
        assert!(inverted.effective(&current).span().is_none());
    }

    #[test]
    fn apply_preserves_untouched_fields() {
        let mut appt = appointment(Some("prof"), Some("pat"), 100, 200);
        appt.clinic_id = Some("clinic".into());
        let before = appt.clone();

        AppointmentChanges {
            status: Some(AppointmentStatus::Cancelled),
            ..Default::default()
        }
        .apply(&mut appt);

        assert_eq!(appt.status, AppointmentStatus::Cancelled);
        assert_eq!(appt.span, before.span);
        assert_eq!(appt.professional_id, before.professional_id);
        assert_eq!(appt.patient_id, before.patient_id);
        assert_eq!(appt.clinic_id, before.clinic_id);
        assert_eq!(appt.created_at, before.created_at);
        assert_eq!(appt.id, before.id);
    }

    #[test]
    fn lane_keeps_start_order() {
        let mut lane = Lane::default();
        lane.insert(entry(300, 400));
        lane.insert(entry(100, 200));
        lane.insert(entry(200, 300));
        let starts: Vec<Ms> = lane.entries.iter().map(|e| e.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn lane_overlapping_skips_past_and_future() {
        let mut lane = Lane::default();
        lane.insert(entry(100, 200));
        lane.insert(entry(450, 600));
        lane.insert(entry(1000, 1100));

        let hits: Vec<_> = lane.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn lane_adjacent_not_a_conflict() {
        let mut lane = Lane::default();
        lane.insert(entry(100, 200));
        assert!(!lane.conflicts(&Span::new(200, 300), None));
        assert!(!lane.conflicts(&Span::new(0, 100), None));
        assert!(lane.conflicts(&Span::new(199, 300), None));
    }

    #[test]
    fn lane_conflict_excludes_self() {
        let mut lane = Lane::default();
        let own = entry(100, 200);
        lane.insert(own);
        assert!(!lane.conflicts(&Span::new(120, 180), Some(own.id)));
        assert!(lane.conflicts(&Span::new(120, 180), Some(Ulid::new())));
    }

    #[test]
    fn lane_remove() {
        let mut lane = Lane::default();
        let a = entry(0, 50);
        let b = entry(100, 150);
        let c = entry(200, 250);
        lane.insert(a);
        lane.insert(b);
        lane.insert(c);
        assert_eq!(lane.remove(b.id), Some(b));
        assert!(lane.remove(Ulid::new()).is_none());
        assert_eq!(lane.entries, vec![a, c]);
    }

    #[test]
    fn event_bincode_roundtrip() {
        let event = Event::AppointmentCreated {
            appointment: appointment(Some("prof"), None, 0, 60_000),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
