//! Fixture replay
//!
//! Runs every case of a fixture set against one session and records how each
//! one went. A failing case never stops the run; a failed initialize marks
//! every case as skipped instead of failing them one by one.

use crate::config::ExerciserConfig;
use crate::driver::DriverError;
use crate::fixture::compare::{Mismatch, compare_hover, compare_locations};
use crate::fixture::{FixtureSet, LocationCase};
use crate::lsp::types::DocumentPositionParams;
use crate::session::{LanguageSession, QueryKind, Session, SessionError};
use std::fmt;
use tracing::{info, warn};

/// How a single case ended
#[derive(Debug, Clone, PartialEq)]
pub enum CaseStatus {
    Passed,
    /// The server answered, but not with the recorded result
    Failed(Vec<Mismatch>),
    /// The call itself failed
    Errored(String),
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseOutcome {
    pub kind: QueryKind,
    /// Position of the case within its collection
    pub index: usize,
    pub file: String,
    pub line: u32,
    pub character: u32,
    pub status: CaseStatus,
}

impl fmt::Display for CaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = format!(
            "{} #{} {}:{}:{}",
            self.kind, self.index, self.file, self.line, self.character
        );
        match &self.status {
            CaseStatus::Passed => write!(f, "PASS {label}"),
            CaseStatus::Failed(mismatches) => {
                write!(f, "FAIL {label}")?;
                for mismatch in mismatches {
                    write!(f, "\n    {mismatch}")?;
                }
                Ok(())
            }
            CaseStatus::Errored(error) => write!(f, "ERROR {label}: {error}"),
            CaseStatus::Skipped(reason) => write!(f, "SKIP {label}: {reason}"),
        }
    }
}

/// Everything a replay run observed
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayReport {
    pub language: String,
    pub outcomes: Vec<CaseOutcome>,
    /// Shutdown or close failures after the cases ran
    pub teardown_errors: Vec<String>,
}

impl ReplayReport {
    pub fn passed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == CaseStatus::Passed)
            .count()
    }

    /// Every case passed and the session shut down cleanly
    pub fn is_success(&self) -> bool {
        self.passed() == self.outcomes.len() && self.teardown_errors.is_empty()
    }
}

impl fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            writeln!(f, "{outcome}")?;
        }
        for error in &self.teardown_errors {
            writeln!(f, "TEARDOWN {error}")?;
        }
        write!(
            f,
            "{}: {}/{} cases passed",
            self.language,
            self.passed(),
            self.outcomes.len()
        )
    }
}

fn outcome(
    kind: QueryKind,
    index: usize,
    params: &DocumentPositionParams,
    status: CaseStatus,
) -> CaseOutcome {
    CaseOutcome {
        kind,
        index,
        file: params.document().to_string(),
        line: params.position.line,
        character: params.position.character,
        status,
    }
}

/// Every case in declared order: hover, then definition, then references
fn all_positions(fixture: &FixtureSet) -> Vec<(QueryKind, usize, DocumentPositionParams)> {
    let hover = fixture
        .hover_cases
        .iter()
        .enumerate()
        .map(|(index, case)| (QueryKind::Hover, index, case.to_request_params()));
    let locations = |kind: QueryKind, cases: &[LocationCase]| {
        cases
            .iter()
            .enumerate()
            .map(|(index, case)| (kind, index, case.to_request_params()))
            .collect::<Vec<_>>()
    };

    hover
        .chain(locations(QueryKind::Definition, &fixture.definition_cases))
        .chain(locations(QueryKind::References, &fixture.references_cases))
        .collect()
}

fn status_of(mismatches: Vec<Mismatch>) -> CaseStatus {
    if mismatches.is_empty() {
        CaseStatus::Passed
    } else {
        CaseStatus::Failed(mismatches)
    }
}

/// Initialize against the fixture's workspace, run every case, shut down
/// and close. The session is closed on every path.
pub async fn replay_fixture<S: LanguageSession>(
    session: &mut S,
    fixture: &FixtureSet,
) -> ReplayReport {
    let mut report = ReplayReport {
        language: fixture.language.clone(),
        outcomes: Vec::with_capacity(fixture.case_count()),
        teardown_errors: Vec::new(),
    };

    let root = fixture.root_path();
    info!("Replaying {} {} cases against {}", fixture.case_count(), fixture.language, root);

    if let Err(e) = session.initialize(&root).await {
        warn!("initialize failed, skipping all cases: {}", e);
        let reason = format!("setup failure: {e}");
        report.outcomes = all_positions(fixture)
            .into_iter()
            .map(|(kind, index, params)| {
                outcome(kind, index, &params, CaseStatus::Skipped(reason.clone()))
            })
            .collect();
        if let Err(e) = session.close().await {
            report.teardown_errors.push(format!("close: {e}"));
        }
        return report;
    }

    for (index, case) in fixture.hover_cases.iter().enumerate() {
        let params = case.to_request_params();
        let status = match session
            .hover(params.document(), params.position.line, params.position.character)
            .await
        {
            Ok(actual) => status_of(compare_hover(&case.expected, actual.as_ref())),
            Err(e) => errored(e),
        };
        report
            .outcomes
            .push(outcome(QueryKind::Hover, index, &params, status));
    }

    for (kind, collection) in [
        (QueryKind::Definition, &fixture.definition_cases),
        (QueryKind::References, &fixture.references_cases),
    ] {
        for (index, case) in collection.iter().enumerate() {
            let params = case.to_request_params();
            let (document, line, character) =
                (params.document(), params.position.line, params.position.character);
            let result = match kind {
                QueryKind::Definition => session.definition(document, line, character).await,
                _ => session.references(document, line, character).await,
            };
            let status = match result {
                Ok(actual) => status_of(compare_locations(&case.expected, &actual)),
                Err(e) => errored(e),
            };
            report.outcomes.push(outcome(kind, index, &params, status));
        }
    }

    if let Err(e) = session.shutdown().await {
        report.teardown_errors.push(format!("shutdown: {e}"));
    }
    if let Err(e) = session.close().await {
        report.teardown_errors.push(format!("close: {e}"));
    }

    report
}

/// A case whose call failed; lost connections are logged since every later case fails too
fn errored(error: SessionError) -> CaseStatus {
    if error.is_transport() {
        warn!("Lost the language server during replay: {}", error);
    }
    CaseStatus::Errored(error.to_string())
}

/// Open the configured server and replay the built-in fixtures for `language`
///
/// The fixture repository is expected at `<root>/<repo>`.
pub async fn run(config: &ExerciserConfig, language: &str) -> Result<ReplayReport, DriverError> {
    let fixture = FixtureSet::builtin(language, &config.root)?;
    let mut session = Session::open(&config.target).await?;

    let report = replay_fixture(&mut session, &fixture).await;
    info!("{} of {} cases passed", report.passed(), report.outcomes.len());
    Ok(report)
}
