use sasds_agents::{Analysis, GeneratedCode, ReviewReport, StageOutcome, StageSource};
use sasds_validator::TestReport;

/// Which strategy produced one stage of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageNote {
    pub stage: &'static str,
    pub source: StageSource,
}

/// Immutable snapshot of one requirement's trip through the pipeline.
///
/// Each `with_*` method returns a new snapshot and drops results that were
/// derived from the value it replaces.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Session {
    pub requirement: String,
    pub analysis: Option<Analysis>,
    pub code: Option<GeneratedCode>,
    pub test_report: Option<TestReport>,
    pub review: Option<ReviewReport>,
    pub notes: Vec<StageNote>,
}

impl Session {
    pub fn new(requirement: impl Into<String>) -> Self {
        Self {
            requirement: requirement.into(),
            ..Self::default()
        }
    }

    /// A session for code that did not come out of `generate`.
    pub fn from_code(requirement: impl Into<String>, code: GeneratedCode) -> Self {
        Self {
            requirement: requirement.into(),
            code: Some(code),
            ..Self::default()
        }
    }

    pub fn with_analysis(&self, stage: &'static str, outcome: StageOutcome<Analysis>) -> Self {
        let mut next = self.noted(stage, outcome.source);
        next.analysis = Some(outcome.value);
        next.code = None;
        next.test_report = None;
        next.review = None;
        next
    }

    pub fn with_code(&self, stage: &'static str, outcome: StageOutcome<GeneratedCode>) -> Self {
        let mut next = self.noted(stage, outcome.source);
        next.code = Some(outcome.value);
        next.test_report = None;
        next.review = None;
        next
    }

    pub fn with_test_report(&self, report: TestReport) -> Self {
        let mut next = self.clone();
        next.test_report = Some(report);
        next.review = None;
        next
    }

    pub fn with_review(&self, stage: &'static str, outcome: StageOutcome<ReviewReport>) -> Self {
        let mut next = self.noted(stage, outcome.source);
        next.review = Some(outcome.value);
        next
    }

    /// The reviewer's refined module when there is one, else the generated one.
    pub fn latest_code(&self) -> Option<&str> {
        self.review
            .as_ref()
            .and_then(|review| review.refined_code.as_deref())
            .or_else(|| self.code.as_ref().map(|code| code.source.as_str()))
    }

    pub fn source_of(&self, stage: &str) -> Option<&StageSource> {
        self.notes
            .iter()
            .rev()
            .find(|note| note.stage == stage)
            .map(|note| &note.source)
    }

    fn noted(&self, stage: &'static str, source: StageSource) -> Self {
        let mut next = self.clone();
        next.notes.push(StageNote { stage, source });
        next
    }
}
