//! Issuance session: the event-driven state machine behind the terminal driver

use super::state::{IssuanceEvent, IssuanceState};
use super::traits::IssuanceSteps;
use crate::composer::RenderedDocument;
use crate::error::{LiaisonError, Result};
use crate::preview::PreviewImage;
use liaison_types::{EmployeeRecord, LedgerEntry, LetterRequest};

/// Drives one clerk's flow from search to ledger entry
pub struct IssuanceSession<T: IssuanceSteps> {
    steps: T,
    state: IssuanceState,
}

impl<T: IssuanceSteps> IssuanceSession<T> {
    pub fn new(steps: T) -> Self {
        Self {
            steps,
            state: IssuanceState::Idle,
        }
    }

    pub fn state(&self) -> &IssuanceState {
        &self.state
    }

    pub fn steps(&self) -> &T {
        &self.steps
    }

    /// Apply one event. On error the session stays in (or returns to) a
    /// state from which the clerk can retry; see each transition below.
    pub fn handle(&mut self, event: IssuanceEvent) -> Result<&IssuanceState> {
        let event_name = event.name();
        let current = std::mem::take(&mut self.state);
        let from = current.name();

        let (next, outcome) = self.transition(current, event);
        match &outcome {
            Ok(()) => log::info!("{}: {} -> {}", event_name, from, next.name()),
            Err(e) => log::warn!("{} failed in {}: {} (now {})", event_name, from, e, next.name()),
        }

        self.state = next;
        outcome.map(|_| &self.state)
    }

    fn transition(&mut self, state: IssuanceState, event: IssuanceEvent) -> (IssuanceState, Result<()>) {
        use IssuanceEvent as E;
        use IssuanceState as S;

        match (state, event) {
            (_, E::Reset) => (S::Idle, Ok(())),

            (state @ (S::Idle | S::Searching { .. } | S::LedgerAppended { .. } | S::Cancelled), E::Search(query)) => {
                let hits = self.steps.search(&query);
                if hits.is_empty() {
                    let err = LiaisonError::NotFound(format!("No employee matches '{}'", query.trim()));
                    return (state, Err(err));
                }
                log::debug!("Search {:?} matched {} employee(s)", query, hits.len());
                (S::Searching { query, hits }, Ok(()))
            }

            (state, E::Select(employee_id)) if !matches!(state, S::Idle) => {
                match self.steps.find_employee(&employee_id) {
                    Some(record) => (S::RecordSelected { record }, Ok(())),
                    None => {
                        let err = LiaisonError::NotFound(format!("No employee with matricule '{}'", employee_id.trim()));
                        (state, Err(err))
                    }
                }
            }

            (S::RecordSelected { record } | S::PreviewReady { record, .. }, E::Compose(request)) => {
                self.compose(record, request)
            }

            (
                S::PreviewReady {
                    record,
                    request,
                    document,
                    preview,
                    ..
                },
                E::Confirm,
            ) => self.confirm(record, request, document, preview),

            (state, E::Cancel) if !state.is_terminal() => (S::Cancelled, Ok(())),

            (state, event) => {
                let err = LiaisonError::Workflow(format!("Cannot {} while {}", event.name(), state.name()));
                (state, Err(err))
            }
        }
    }

    fn compose(&mut self, record: EmployeeRecord, mut request: LetterRequest) -> (IssuanceState, Result<()>) {
        if request.employee_id.trim().is_empty() {
            request.employee_id = record.id.clone();
        }
        self.state = IssuanceState::Composing {
            record: record.clone(),
            request: request.clone(),
        };

        let produced = self.steps.compose(&record, &request).and_then(|document| {
            let preview = self.steps.render_preview(&document)?;
            Ok((document, preview))
        });

        match produced {
            Ok((document, preview)) => {
                let period = self.steps.period_for(request.issue_date);
                let duplicate = self.steps.has_duplicate(&record.id, &period).then_some(period);
                if let Some(period) = &duplicate {
                    log::warn!("Employee {} already has a letter for {}", record.id, period);
                }
                let next = IssuanceState::PreviewReady {
                    record,
                    request,
                    document,
                    preview,
                    duplicate,
                };
                (next, Ok(()))
            }
            Err(e) => (IssuanceState::RecordSelected { record }, Err(e)),
        }
    }

    fn confirm(
        &mut self,
        record: EmployeeRecord,
        request: LetterRequest,
        document: RenderedDocument,
        preview: PreviewImage,
    ) -> (IssuanceState, Result<()>) {
        let period = self.steps.period_for(request.issue_date);
        if self.steps.has_duplicate(&record.id, &period) {
            let err = LiaisonError::DuplicateIssuance {
                employee_id: record.id.clone(),
                period: period.to_string(),
            };
            let back = IssuanceState::PreviewReady {
                record,
                request,
                document,
                preview,
                duplicate: Some(period),
            };
            return (back, Err(err));
        }

        self.state = IssuanceState::Confirmed {
            record: record.clone(),
            request: request.clone(),
            document: document.clone(),
            preview: preview.clone(),
        };

        let back = |duplicate| IssuanceState::PreviewReady {
            record: record.clone(),
            request: request.clone(),
            document: document.clone(),
            preview: preview.clone(),
            duplicate,
        };

        let path = match self.steps.save_document(&document) {
            Ok(path) => path,
            Err(e) => {
                let err = LiaisonError::Persistence(format!(
                    "Letter {} was generated but could not be saved or recorded: {}",
                    document.file_name, e
                ));
                return (back(None), Err(err));
            }
        };

        let entry = LedgerEntry::from_issuance(&record, &request, self.steps.now());
        match self.steps.record_issuance(entry.clone()) {
            Ok(()) => (IssuanceState::LedgerAppended { entry, path }, Ok(())),
            Err(e @ LiaisonError::DuplicateIssuance { .. }) => (back(Some(period)), Err(e)),
            Err(e) => {
                let err = LiaisonError::Persistence(format!(
                    "Letter was generated and saved to {} but not recorded in the ledger: {}",
                    path.display(),
                    e
                ));
                (back(None), Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use liaison_types::{Period, PeriodGranularity};
    use std::cell::Cell;
    use std::path::PathBuf;

    struct MockSteps {
        records: Vec<EmployeeRecord>,
        ledger: Vec<LedgerEntry>,
        should_fail_at_step: Option<&'static str>,
        compose_calls: Cell<usize>,
    }

    impl MockSteps {
        fn new() -> Self {
            let record = |id: &str, last: &str, first: &str| EmployeeRecord {
                id: id.to_string(),
                last_name: last.to_string(),
                first_name: first.to_string(),
                cin: "01234567".to_string(),
                cnss: String::new(),
            };
            Self {
                records: vec![record("1042", "Dupont", "Jean"), record("1043", "Dupond", "Hélène")],
                ledger: Vec::new(),
                should_fail_at_step: None,
                compose_calls: Cell::new(0),
            }
        }

        fn with_failure_at(mut self, step: &'static str) -> Self {
            self.should_fail_at_step = Some(step);
            self
        }

        fn fails_at(&self, step: &str) -> bool {
            self.should_fail_at_step == Some(step)
        }
    }

    impl IssuanceSteps for MockSteps {
        fn search(&self, query: &str) -> Vec<EmployeeRecord> {
            let query = query.trim().to_lowercase();
            self.records
                .iter()
                .filter(|r| r.id.contains(&query) || r.full_name().to_lowercase().contains(&query))
                .cloned()
                .collect()
        }

        fn find_employee(&self, employee_id: &str) -> Option<EmployeeRecord> {
            self.records.iter().find(|r| r.id == employee_id.trim()).cloned()
        }

        fn compose(&self, record: &EmployeeRecord, request: &LetterRequest) -> Result<RenderedDocument> {
            self.compose_calls.set(self.compose_calls.get() + 1);
            if self.fails_at("compose") {
                return Err(LiaisonError::Template("care_type".to_string()));
            }
            Ok(RenderedDocument {
                bytes: b"%PDF-mock".to_vec(),
                page_count: 1,
                file_name: format!("lettre_liaison_{}.pdf", record.id),
                reference: request.reference(),
            })
        }

        fn render_preview(&self, _document: &RenderedDocument) -> Result<PreviewImage> {
            if self.fails_at("preview") {
                return Err(LiaisonError::Render("corrupt".to_string()));
            }
            Ok(PreviewImage {
                width: 2,
                height: 2,
                rgb: vec![255; 12],
            })
        }

        fn period_for(&self, date: NaiveDate) -> Period {
            Period::of(date, PeriodGranularity::Month)
        }

        fn has_duplicate(&self, employee_id: &str, period: &Period) -> bool {
            self.ledger
                .iter()
                .any(|e| e.employee_id == employee_id && period.contains(e.admission_date))
        }

        fn save_document(&self, document: &RenderedDocument) -> Result<PathBuf> {
            if self.fails_at("save") {
                return Err(LiaisonError::Persistence("read-only".to_string()));
            }
            Ok(PathBuf::from("/out").join(&document.file_name))
        }

        fn record_issuance(&mut self, entry: LedgerEntry) -> Result<()> {
            if self.fails_at("record") {
                return Err(LiaisonError::Persistence("file locked".to_string()));
            }
            self.ledger.push(entry);
            Ok(())
        }

        fn now(&self) -> NaiveDateTime {
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap()
        }
    }

    fn request() -> LetterRequest {
        LetterRequest::new(
            "",
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            "CH Metz",
            "Consultation médicale",
        )
    }

    fn session_at_preview(steps: MockSteps) -> IssuanceSession<MockSteps> {
        let mut session = IssuanceSession::new(steps);
        session.handle(IssuanceEvent::Search("dupont".into())).unwrap();
        session.handle(IssuanceEvent::Select("1042".into())).unwrap();
        session.handle(IssuanceEvent::Compose(request())).unwrap();
        session
    }

    #[test]
    fn test_happy_path_reaches_ledger_appended() {
        let mut session = session_at_preview(MockSteps::new());
        match session.state() {
            IssuanceState::PreviewReady { request, duplicate, .. } => {
                assert_eq!(request.employee_id, "1042");
                assert!(duplicate.is_none());
            }
            other => panic!("expected PreviewReady, got {}", other),
        }

        let state = session.handle(IssuanceEvent::Confirm).unwrap();
        match state {
            IssuanceState::LedgerAppended { entry, path } => {
                assert_eq!(entry.employee_id, "1042");
                assert_eq!(entry.full_name, "Dupont Jean");
                assert_eq!(entry.reference, "LL-1042-20240301");
                assert_eq!(path, &PathBuf::from("/out/lettre_liaison_1042.pdf"));
            }
            other => panic!("expected LedgerAppended, got {}", other),
        }
        assert!(session.state().is_terminal());
        assert_eq!(session.steps().ledger.len(), 1);
    }

    #[test]
    fn test_search_without_hits_keeps_state() {
        let mut session = IssuanceSession::new(MockSteps::new());
        let err = session.handle(IssuanceEvent::Search("zzz".into())).unwrap_err();
        assert!(matches!(err, LiaisonError::NotFound(_)));
        assert!(matches!(session.state(), IssuanceState::Idle));
    }

    #[test]
    fn test_select_from_idle_is_invalid() {
        let mut session = IssuanceSession::new(MockSteps::new());
        let err = session.handle(IssuanceEvent::Select("1042".into())).unwrap_err();
        assert!(matches!(err, LiaisonError::Workflow(_)));
        assert!(matches!(session.state(), IssuanceState::Idle));
    }

    #[test]
    fn test_reselect_from_preview_returns_to_record_selected() {
        let mut session = session_at_preview(MockSteps::new());
        session.handle(IssuanceEvent::Select("1043".into())).unwrap();
        assert_eq!(session.state().record().map(|r| r.id.as_str()), Some("1043"));
        assert_eq!(session.state().name(), "RecordSelected");
    }

    #[test]
    fn test_compose_failure_returns_to_record_selected() {
        let mut session = IssuanceSession::new(MockSteps::new().with_failure_at("preview"));
        session.handle(IssuanceEvent::Search("1042".into())).unwrap();
        session.handle(IssuanceEvent::Select("1042".into())).unwrap();
        let err = session.handle(IssuanceEvent::Compose(request())).unwrap_err();
        assert!(matches!(err, LiaisonError::Render(_)));
        assert_eq!(session.state().name(), "RecordSelected");
    }

    #[test]
    fn test_recompose_from_preview() {
        let mut session = session_at_preview(MockSteps::new());
        session.handle(IssuanceEvent::Compose(request())).unwrap();
        assert_eq!(session.steps().compose_calls.get(), 2);
        assert_eq!(session.state().name(), "PreviewReady");
    }

    #[test]
    fn test_duplicate_blocks_confirm() {
        let mut session = session_at_preview(MockSteps::new());
        session.handle(IssuanceEvent::Confirm).unwrap();

        // Same employee, same month
        session.handle(IssuanceEvent::Select("1042".into())).unwrap();
        session.handle(IssuanceEvent::Compose(request())).unwrap();
        match session.state() {
            IssuanceState::PreviewReady { duplicate, .. } => {
                assert_eq!(duplicate.map(|p| p.to_string()), Some("2024-03".to_string()));
            }
            other => panic!("expected PreviewReady, got {}", other),
        }

        let err = session.handle(IssuanceEvent::Confirm).unwrap_err();
        assert!(matches!(err, LiaisonError::DuplicateIssuance { .. }));
        assert_eq!(session.state().name(), "PreviewReady");
        assert_eq!(session.steps().ledger.len(), 1);
    }

    #[test]
    fn test_ledger_failure_keeps_preview_and_says_so() {
        let mut session = session_at_preview(MockSteps::new().with_failure_at("record"));
        let err = session.handle(IssuanceEvent::Confirm).unwrap_err();
        match err {
            LiaisonError::Persistence(message) => {
                assert!(message.contains("generated"));
                assert!(message.contains("not recorded"));
            }
            other => panic!("expected persistence error, got {:?}", other),
        }
        assert_eq!(session.state().name(), "PreviewReady");
    }

    #[test]
    fn test_save_failure_keeps_preview() {
        let mut session = session_at_preview(MockSteps::new().with_failure_at("save"));
        let err = session.handle(IssuanceEvent::Confirm).unwrap_err();
        assert!(matches!(err, LiaisonError::Persistence(_)));
        assert_eq!(session.state().name(), "PreviewReady");
        assert!(session.steps().ledger.is_empty());
    }

    #[test]
    fn test_cancel_then_reset() {
        let mut session = session_at_preview(MockSteps::new());
        session.handle(IssuanceEvent::Cancel).unwrap();
        assert!(matches!(session.state(), IssuanceState::Cancelled));

        // Terminal: a second cancel is rejected, confirm too
        assert!(session.handle(IssuanceEvent::Cancel).is_err());
        assert!(session.handle(IssuanceEvent::Confirm).is_err());

        session.handle(IssuanceEvent::Reset).unwrap();
        assert!(matches!(session.state(), IssuanceState::Idle));
    }

    #[test]
    fn test_search_allowed_after_terminal_state() {
        let mut session = session_at_preview(MockSteps::new());
        session.handle(IssuanceEvent::Confirm).unwrap();
        session.handle(IssuanceEvent::Search("dupond".into())).unwrap();
        match session.state() {
            IssuanceState::Searching { hits, .. } => assert_eq!(hits[0].id, "1043"),
            other => panic!("expected Searching, got {}", other),
        }
    }

    #[test]
    fn test_confirm_outside_preview_is_invalid() {
        let mut session = IssuanceSession::new(MockSteps::new());
        session.handle(IssuanceEvent::Search("1042".into())).unwrap();
        let err = session.handle(IssuanceEvent::Confirm).unwrap_err();
        assert!(matches!(err, LiaisonError::Workflow(_)));
        assert_eq!(session.state().name(), "Searching");
    }
}
