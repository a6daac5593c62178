use crate::Stage;
use anyhow::{Result, anyhow};
use sasds_llm::CompletionRequest;
use sasds_validator::TestReport;
use serde::{Deserialize, Serialize};

const SYSTEM_PROMPT: &str = "You are a meticulous Python code reviewer. Write a short review with \
bullet points first, then one improved version of the whole module in a single fenced code block.";

const MAX_IMPROVEMENTS: usize = 5;
const LOCAL_IMPROVEMENTS: usize = 3;
const MIN_IMPROVEMENT_LEN: usize = 10;

const STANDARD_IMPROVEMENTS: [&str; 6] = [
    "Add comprehensive error handling",
    "Include type hints for better code clarity",
    "Add docstrings to all functions",
    "Implement input validation",
    "Consider edge cases",
    "Add logging for debugging",
];
const FIX_FAILURES: &str = "Fix failing test cases";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewReport {
    pub summary: String,
    pub improvements: Vec<String>,
    pub refined_code: Option<String>,
}

impl ReviewReport {
    /// Markdown body used for `review_report.md` exports.
    pub fn to_markdown(&self) -> String {
        let mut out = String::from("# Code Review Report\n\n");
        out.push_str(self.summary.trim());
        out.push_str("\n\n## Improvements\n\n");
        if self.improvements.is_empty() {
            out.push_str("_None suggested._\n");
        }
        for improvement in &self.improvements {
            out.push_str(&format!("- {improvement}\n"));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewSubject {
    pub code: String,
    pub test_report: Option<TestReport>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Reviewer;

impl Reviewer {
    fn counts(subject: &ReviewSubject) -> (usize, usize) {
        subject
            .test_report
            .as_ref()
            .map(|report| (report.passed, report.failed))
            .unwrap_or((0, 0))
    }
}

impl Stage for Reviewer {
    type Input = ReviewSubject;
    type Output = ReviewReport;
    const PURPOSE: &'static str = "review";

    fn request(&self, subject: &ReviewSubject) -> CompletionRequest {
        let (passed, failed) = Self::counts(subject);
        let prompt = format!(
            "Review this Python code and provide:\n\
             1. Code quality assessment\n\
             2. Performance improvements\n\
             3. Bug fixes if needed\n\
             4. Best practices recommendations\n\
             5. Security considerations\n\n\
             Current test status: Tests Passed: {passed}, Failed: {failed}\n\n\
             Code:\n{code}\n\n\
             Provide a review report and then generate an improved version of the code.",
            code = subject.code,
        );
        CompletionRequest {
            purpose: Self::PURPOSE.to_string(),
            system: SYSTEM_PROMPT.to_string(),
            prompt,
        }
    }

    fn interpret(&self, reply: &str, _subject: &ReviewSubject) -> Result<ReviewReport> {
        parse_review_reply(reply)
    }

    fn local(&self, subject: &ReviewSubject) -> ReviewReport {
        let (passed, failed) = Self::counts(subject);

        let mut improvements: Vec<String> = Vec::new();
        if failed > 0 {
            improvements.push(FIX_FAILURES.to_string());
        }
        improvements.extend(STANDARD_IMPROVEMENTS.iter().map(|item| item.to_string()));
        improvements.truncate(LOCAL_IMPROVEMENTS);

        let recommendations = improvements
            .iter()
            .map(|item| format!("- {item}"))
            .collect::<Vec<_>>()
            .join("\n");
        let summary = format!(
            "Code Review Report\n==================\n\n\
             Test Results: {passed} passed, {failed} failed\n\n\
             Recommendations:\n{recommendations}"
        );

        ReviewReport {
            summary,
            improvements,
            refined_code: None,
        }
    }
}

/// Text before the first fence is the summary; the first fenced block is
/// the refined module.
pub fn parse_review_reply(reply: &str) -> Result<ReviewReport> {
    let mut parts = reply.split("```");
    let summary = parts.next().unwrap_or_default().trim().to_string();
    let refined_code = parts
        .next()
        .map(strip_language_tag)
        .filter(|code| !code.is_empty());

    if summary.is_empty() && refined_code.is_none() {
        return Err(anyhow!("review reply is empty"));
    }

    Ok(ReviewReport {
        improvements: extract_improvements(&summary),
        summary,
        refined_code,
    })
}

fn strip_language_tag(block: &str) -> String {
    let body = match block.split_once('\n') {
        Some((tag, rest))
            if tag
                .trim()
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '+') =>
        {
            rest
        }
        _ => block,
    };
    body.trim().to_string()
}

/// Bullet or numbered lines of the review, markers removed.
pub fn extract_improvements(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let item = line
                .strip_prefix(['-', '•', '*'])
                .or_else(|| strip_numbering(line))?;
            let item = item.trim();
            (item.chars().count() > MIN_IMPROVEMENT_LEN).then(|| item.to_string())
        })
        .take(MAX_IMPROVEMENTS)
        .collect()
}

fn strip_numbering(line: &str) -> Option<&str> {
    let rest = line.trim_start_matches(|ch: char| ch.is_ascii_digit());
    if rest.len() == line.len() {
        return None;
    }
    rest.strip_prefix(['.', ')'])
}

#[cfg(test)]
mod tests {
    use super::{ReviewSubject, Reviewer, extract_improvements, parse_review_reply};
    use crate::testing::{ScriptedService, remote};
    use crate::{Stage, StageSource};
    use sasds_validator::TestReport;

    fn subject(failed: usize) -> ReviewSubject {
        ReviewSubject {
            code: "print(1)".to_string(),
            test_report: Some(TestReport::new(4, failed, String::new(), String::new())),
        }
    }

    #[test]
    fn local_review_leads_with_failures() {
        let review = Reviewer.local(&subject(2));
        assert_eq!(
            review.improvements,
            vec![
                "Fix failing test cases",
                "Add comprehensive error handling",
                "Include type hints for better code clarity",
            ]
        );
        assert!(review.summary.contains("Test Results: 4 passed, 2 failed"));
        assert_eq!(review.refined_code, None);
    }

    #[test]
    fn local_review_without_failures() {
        let review = Reviewer.local(&subject(0));
        assert_eq!(review.improvements.len(), 3);
        assert_eq!(review.improvements[0], "Add comprehensive error handling");
        insta::assert_snapshot!(review.summary, @r"
        Code Review Report
        ==================

        Test Results: 4 passed, 0 failed

        Recommendations:
        - Add comprehensive error handling
        - Include type hints for better code clarity
        - Add docstrings to all functions
        ");
    }

    #[test]
    fn remote_reply_splits_summary_and_code() {
        let reply = "Overall fine.\n\
                     - Validate the input path before opening\n\
                     * ok\n\
                     2. Close files with a context manager\n\
                     ```python\nprint(2)\n```\ntrailing";
        let review = parse_review_reply(reply).expect("parse should work");
        assert!(review.summary.starts_with("Overall fine."));
        assert!(!review.summary.contains("```"));
        assert_eq!(review.refined_code.as_deref(), Some("print(2)"));
        assert_eq!(
            review.improvements,
            vec![
                "Validate the input path before opening",
                "Close files with a context manager",
            ]
        );
    }

    #[test]
    fn reply_without_fence_has_no_refined_code() {
        let review = parse_review_reply("Looks good to me.").expect("parse should work");
        assert_eq!(review.refined_code, None);
        assert!(review.improvements.is_empty());
    }

    #[test]
    fn improvements_are_capped_at_five() {
        let text = (1..=8)
            .map(|i| format!("- improvement number {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(extract_improvements(&text).len(), 5);
    }

    #[test]
    fn remote_review_is_tagged_with_provider() {
        let strategy = remote(
            ScriptedService::replying("- Split main into helpers\n```\nprint(3)\n```"),
            true,
        );
        let outcome = strategy.process(&Reviewer, &subject(0));
        assert_eq!(outcome.value.refined_code.as_deref(), Some("print(3)"));
        assert!(matches!(outcome.source, StageSource::Remote { .. }));
    }

    #[test]
    fn blank_reply_falls_back_to_local_review() {
        let strategy = remote(ScriptedService::replying("   "), true);
        let outcome = strategy.process(&Reviewer, &subject(1));
        assert_eq!(outcome.value.improvements[0], "Fix failing test cases");
        assert!(matches!(outcome.source, StageSource::Fallback { reason: Some(_) }));
    }
}
