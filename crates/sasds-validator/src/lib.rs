//! Validation of generated Python modules: harness synthesis, isolated pytest
//! execution and report parsing.

pub mod executor;
pub mod harness;
pub mod parser;

pub use executor::{ExecutionOutcome, ExecutorConfig, LaunchFailure, TestExecutor};
pub use harness::{EMBED_LIMIT, HARNESS_FILE, SUBJECT_FILE, synthesize};
pub use parser::{TestReport, parse, parse_log, success_rate};

pub trait CodeValidator {
    fn validate(&self, code: &str) -> TestReport;
}

/// Runs the synthesized harness under pytest and parses the result.
#[derive(Debug, Clone, Default)]
pub struct PytestValidator {
    pub executor: TestExecutor,
}

impl PytestValidator {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            executor: TestExecutor::new(config),
        }
    }
}

impl CodeValidator for PytestValidator {
    fn validate(&self, code: &str) -> TestReport {
        parse(&self.executor.execute(code))
    }
}
