//! ZIP packaging of a finished session.

use crate::session::Session;
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use std::fs::File;
use std::io::{Seek, Write};
use std::path::Path;
use tracing::debug;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

/// Top-level modules that ship with CPython and never belong in
/// `requirements.txt`.
const PYTHON_STDLIB: &[&str] = &[
    "abc", "argparse", "array", "ast", "asyncio", "base64", "bisect", "calendar", "cmath",
    "collections", "concurrent", "configparser", "contextlib", "copy", "csv", "ctypes",
    "dataclasses", "datetime", "decimal", "difflib", "email", "enum", "fractions", "functools",
    "gc", "getpass", "glob", "gzip", "hashlib", "heapq", "hmac", "html", "http", "importlib",
    "inspect", "io", "itertools", "json", "logging", "math", "multiprocessing", "operator", "os",
    "pathlib", "pickle", "platform", "pprint", "queue", "random", "re", "secrets", "select",
    "shlex", "shutil", "signal", "socket", "sqlite3", "statistics", "string", "struct",
    "subprocess", "sys", "tarfile", "tempfile", "textwrap", "threading", "time", "timeit",
    "tkinter", "traceback", "types", "typing", "unittest", "urllib", "uuid", "warnings",
    "weakref", "xml", "zipfile", "zlib",
];

const GITIGNORE: &str = "\
__pycache__/
*.py[cod]
*.egg-info/
.pytest_cache/
.venv/
venv/
.env
dist/
build/
";

/// One file of the exported archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportEntry {
    pub name: &'static str,
    pub contents: String,
}

pub fn is_stdlib_module(name: &str) -> bool {
    let top = name.split('.').next().unwrap_or(name).trim();
    PYTHON_STDLIB.contains(&top.to_ascii_lowercase().as_str())
}

/// Third-party libraries of the analysis, one per line.
pub fn requirements_txt(session: &Session) -> String {
    let Some(analysis) = &session.analysis else {
        return String::new();
    };
    analysis
        .libraries
        .iter()
        .map(|library| library.trim())
        .filter(|library| !library.is_empty() && !is_stdlib_module(library))
        .map(|library| format!("{library}\n"))
        .collect()
}

/// Files of the archive in write order. Fails only when there is no code.
pub fn export_entries(session: &Session, generated_at: DateTime<Utc>) -> Result<Vec<ExportEntry>> {
    let code = session
        .code
        .as_ref()
        .ok_or_else(|| anyhow!("nothing to export: the session has no generated code"))?;

    let mut entries = vec![ExportEntry {
        name: "main.py",
        contents: code.source.clone(),
    }];
    if let Some(refined) = session
        .review
        .as_ref()
        .and_then(|review| review.refined_code.as_ref())
    {
        entries.push(ExportEntry {
            name: "main_refined.py",
            contents: refined.clone(),
        });
    }
    if let Some(report) = &session.test_report {
        entries.push(ExportEntry {
            name: "test_log.txt",
            contents: report.log.clone(),
        });
    }
    if let Some(review) = &session.review {
        entries.push(ExportEntry {
            name: "review_report.md",
            contents: review.to_markdown(),
        });
    }
    entries.push(ExportEntry {
        name: "requirements.txt",
        contents: requirements_txt(session),
    });
    entries.push(ExportEntry {
        name: "README.md",
        contents: readme(session),
    });
    entries.push(ExportEntry {
        name: ".gitignore",
        contents: GITIGNORE.to_string(),
    });
    entries.push(ExportEntry {
        name: "project_metadata.json",
        contents: metadata_json(session, generated_at)?,
    });
    Ok(entries)
}

pub fn write_zip<W: Write + Seek>(
    session: &Session,
    writer: W,
    generated_at: DateTime<Utc>,
) -> Result<W> {
    let entries = export_entries(session, generated_at)?;
    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in &entries {
        debug!(file = entry.name, bytes = entry.contents.len(), "adding archive entry");
        zip.start_file(entry.name, options)
            .with_context(|| format!("failed starting archive entry {}", entry.name))?;
        zip.write_all(entry.contents.as_bytes())
            .with_context(|| format!("failed writing archive entry {}", entry.name))?;
    }
    zip.finish().context("failed finalizing archive")
}

pub fn export_to_path(session: &Session, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed creating archive {}", path.display()))?;
    write_zip(session, file, Utc::now())?;
    Ok(())
}

fn metadata_json(session: &Session, generated_at: DateTime<Utc>) -> Result<String> {
    let test_summary = match &session.test_report {
        Some(report) => json!({
            "passed": report.passed,
            "failed": report.failed,
            "success_rate": report.success_rate,
        }),
        None => json!({ "passed": 0, "failed": 0, "success_rate": null }),
    };
    let stages: serde_json::Map<String, serde_json::Value> = session
        .notes
        .iter()
        .map(|note| (note.stage.to_string(), json!(note.source.describe())))
        .collect();

    let metadata = json!({
        "generated_at": generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        "requirement": session.requirement,
        "analysis": session.analysis,
        "test_summary": test_summary,
        "stages": stages,
    });
    serde_json::to_string_pretty(&metadata).context("failed serializing project metadata")
}

fn readme(session: &Session) -> String {
    let mut out = String::from("# Generated Python Project\n\n");
    let requirement = session.requirement.trim();
    if !requirement.is_empty() {
        out.push_str("## Requirement\n\n");
        out.push_str(requirement);
        out.push_str("\n\n");
    }
    if let Some(analysis) = &session.analysis {
        out.push_str("## Tasks\n\n");
        for task in &analysis.tasks {
            out.push_str(&format!("- {task}\n"));
        }
        out.push('\n');
    }
    out.push_str("## Usage\n\n```bash\npip install -r requirements.txt\npython main.py\n```\n");
    if let Some(report) = &session.test_report {
        out.push_str(&format!(
            "\n## Test Results\n\n{} passed, {} failed ({:.1}% success)\n",
            report.passed, report.failed, report.success_rate
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{export_entries, is_stdlib_module, requirements_txt, write_zip};
    use crate::session::Session;
    use chrono::{TimeZone, Utc};
    use sasds_agents::{
        GeneratedCode, ReviewReport, StageOutcome, StageSource, fallback_analysis,
    };
    use sasds_validator::TestReport;
    use std::io::{Cursor, Read};

    fn fixed_time() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5)
            .single()
            .expect("timestamp should be valid")
    }

    fn local<T>(value: T) -> StageOutcome<T> {
        StageOutcome {
            value,
            source: StageSource::Fallback { reason: None },
        }
    }

    #[test]
    fn stdlib_filter_handles_dotted_and_cased_names() {
        assert!(is_stdlib_module("os.path"));
        assert!(is_stdlib_module("JSON"));
        assert!(!is_stdlib_module("pandas"));
    }

    #[test]
    fn requirements_drop_stdlib_modules() {
        let session = Session::new("plot csv")
            .with_analysis("analyze", local(fallback_analysis("Plot a CSV")));
        assert_eq!(requirements_txt(&session), "matplotlib\npandas\n");
    }

    #[test]
    fn full_session_exports_every_optional_file() {
        let session = Session::new("csv")
            .with_analysis("analyze", local(fallback_analysis("csv")))
            .with_code("generate", local(GeneratedCode::python("print(1)")))
            .with_test_report(TestReport::new(3, 1, "log body".to_string(), "x".to_string()))
            .with_review(
                "review",
                local(ReviewReport {
                    summary: "fine".to_string(),
                    improvements: vec!["Add logging for debugging".to_string()],
                    refined_code: Some("print(2)".to_string()),
                }),
            );

        let names: Vec<&str> = export_entries(&session, fixed_time())
            .expect("export should work")
            .iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "main.py",
                "main_refined.py",
                "test_log.txt",
                "review_report.md",
                "requirements.txt",
                "README.md",
                ".gitignore",
                "project_metadata.json",
            ]
        );
    }

    #[test]
    fn metadata_carries_timestamp_and_summary() {
        let session = Session::from_code("x", GeneratedCode::python("print(1)"))
            .with_test_report(TestReport::new(3, 1, String::new(), String::new()));
        let mut archive = zip::ZipArchive::new(
            write_zip(&session, Cursor::new(Vec::new()), fixed_time()).expect("zip should work"),
        )
        .expect("archive should open");

        let mut raw = String::new();
        archive
            .by_name("project_metadata.json")
            .expect("metadata should exist")
            .read_to_string(&mut raw)
            .expect("read should work");
        let metadata: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
        assert_eq!(metadata["generated_at"], "2026-01-02T03:04:05Z");
        assert_eq!(metadata["test_summary"]["passed"], 3);
        assert_eq!(metadata["test_summary"]["failed"], 1);
        assert_eq!(metadata["test_summary"]["success_rate"], 75.0);
        assert!(metadata["analysis"].is_null());
    }

    #[test]
    fn session_without_code_cannot_be_exported() {
        let err = export_entries(&Session::new("x"), fixed_time()).expect_err("should fail");
        assert!(err.to_string().contains("no generated code"));
    }
}
