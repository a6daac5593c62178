pub mod export;
pub mod session;

use anyhow::{Context, Result};
use sasds_agents::cache::CompletionCache;
use sasds_agents::{
    CodeGenerator, RequirementAnalyzer, ReviewSubject, Reviewer, Stage, StageSource, Strategy,
};
use sasds_llm::CompletionService;
use sasds_validator::CodeValidator;
use tracing::info;

pub use export::{export_entries, export_to_path, write_zip};
pub use session::{Session, StageNote};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    Silent,
    Minimal,
    Verbose,
}

/// analyze -> generate -> test -> review over immutable [`Session`]s.
pub struct Pipeline<S, C, V>
where
    S: CompletionService,
    C: CompletionCache,
    V: CodeValidator,
{
    pub strategy: Strategy<S, C>,
    pub validator: V,
    pub progress: ProgressMode,
}

impl<S, C, V> Pipeline<S, C, V>
where
    S: CompletionService,
    C: CompletionCache,
    V: CodeValidator,
{
    pub fn new(strategy: Strategy<S, C>, validator: V, progress: ProgressMode) -> Self {
        Self {
            strategy,
            validator,
            progress,
        }
    }

    pub fn analyze(&self, session: &Session) -> Session {
        self.starting(RequirementAnalyzer::PURPOSE);
        let outcome = self
            .strategy
            .process(&RequirementAnalyzer, session.requirement.as_str());
        self.finished(RequirementAnalyzer::PURPOSE, &outcome.source);
        session.with_analysis(RequirementAnalyzer::PURPOSE, outcome)
    }

    pub fn generate(&self, session: &Session) -> Result<Session> {
        let analysis = session
            .analysis
            .as_ref()
            .context("cannot generate code before the requirement is analyzed")?;
        self.starting(CodeGenerator::PURPOSE);
        let outcome = self.strategy.process(&CodeGenerator, analysis);
        self.finished(CodeGenerator::PURPOSE, &outcome.source);
        Ok(session.with_code(CodeGenerator::PURPOSE, outcome))
    }

    pub fn test(&self, session: &Session) -> Result<Session> {
        let code = session
            .code
            .as_ref()
            .context("cannot test before code is generated")?;
        if matches!(self.progress, ProgressMode::Verbose) {
            eprintln!("[sasds] running pytest harness");
        }
        let report = self.validator.validate(&code.source);
        info!(
            passed = report.passed,
            failed = report.failed,
            "validation finished"
        );
        if !matches!(self.progress, ProgressMode::Silent) {
            eprintln!(
                "[sasds] tests: {} passed, {} failed ({:.1}%)",
                report.passed, report.failed, report.success_rate
            );
        }
        Ok(session.with_test_report(report))
    }

    pub fn review(&self, session: &Session) -> Result<Session> {
        let code = session
            .code
            .as_ref()
            .context("cannot review before code is generated")?;
        let subject = ReviewSubject {
            code: code.source.clone(),
            test_report: session.test_report.clone(),
        };
        self.starting(Reviewer::PURPOSE);
        let outcome = self.strategy.process(&Reviewer, &subject);
        self.finished(Reviewer::PURPOSE, &outcome.source);
        Ok(session.with_review(Reviewer::PURPOSE, outcome))
    }

    /// Whole chain for one requirement.
    pub fn run(&self, requirement: &str) -> Result<Session> {
        let session = self.analyze(&Session::new(requirement));
        let session = self.generate(&session)?;
        let session = self.test(&session)?;
        self.review(&session)
    }

    fn starting(&self, stage: &str) {
        if matches!(self.progress, ProgressMode::Verbose) {
            eprintln!(
                "[sasds] {stage} starting (remote={})",
                self.strategy.is_remote()
            );
        }
    }

    fn finished(&self, stage: &str, source: &StageSource) {
        match self.progress {
            ProgressMode::Silent => {}
            ProgressMode::Minimal => match source {
                StageSource::Remote { .. } => {
                    eprintln!("[sasds] {stage} via {}", source.describe())
                }
                StageSource::Fallback {
                    reason: Some(reason),
                } => eprintln!("[sasds] {stage}: model unavailable ({reason}); used local rules"),
                StageSource::Fallback { reason: None } => {}
            },
            ProgressMode::Verbose => eprintln!("[sasds] {stage} via {}", source.describe()),
        }
    }
}
