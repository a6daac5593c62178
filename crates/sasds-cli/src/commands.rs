use crate::RuntimeArgs;
use crate::runtime_context::{self, SasdsPipeline};
use anyhow::{Context, Result, anyhow};
use sasds_agents::{GeneratedCode, attach_file};
use sasds_core::{Session, export_to_path};
use sasds_validator::{TestReport, synthesize};
use serde_json::json;
use std::fs;
use std::path::Path;
use tracing::Level;

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    // A second command in the same process keeps the first subscriber.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn prepare(runtime: &RuntimeArgs) -> Result<SasdsPipeline> {
    let overrides = runtime.overrides();
    let resolved = runtime_context::resolve_config(runtime.config.clone(), &overrides)?;
    init_tracing(resolved.verbose);
    runtime_context::build_pipeline(&resolved, overrides.model)
}

fn requirement_text(requirement: &str, attach: Option<&Path>) -> Result<String> {
    let Some(path) = attach else {
        return Ok(requirement.to_string());
    };
    let bytes =
        fs::read(path).with_context(|| format!("failed reading attachment {}", path.display()))?;
    let content = String::from_utf8_lossy(&bytes);
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(attach_file(requirement, &name, &content))
}

fn read_module(file: &Path) -> Result<Session> {
    let source = fs::read_to_string(file)
        .with_context(|| format!("failed reading module {}", file.display()))?;
    Ok(Session::from_code("", GeneratedCode::python(source)))
}

pub(crate) fn analyze_command(
    requirement: &str,
    attach: Option<&Path>,
    runtime: &RuntimeArgs,
) -> Result<()> {
    let pipeline = prepare(runtime)?;
    let session = pipeline.analyze(&Session::new(requirement_text(requirement, attach)?));
    let analysis = session
        .analysis
        .as_ref()
        .ok_or_else(|| anyhow!("analysis produced no result"))?;
    let rendered =
        serde_json::to_string_pretty(analysis).context("failed serializing analysis")?;
    println!("{rendered}");
    Ok(())
}

pub(crate) fn generate_command(
    requirement: &str,
    attach: Option<&Path>,
    output: Option<&Path>,
    runtime: &RuntimeArgs,
) -> Result<()> {
    let pipeline = prepare(runtime)?;
    let session = pipeline.analyze(&Session::new(requirement_text(requirement, attach)?));
    let session = pipeline.generate(&session)?;
    let code = session
        .code
        .as_ref()
        .ok_or_else(|| anyhow!("generation produced no code"))?;

    match output {
        Some(path) => {
            fs::write(path, &code.source)
                .with_context(|| format!("failed writing {}", path.display()))?;
            eprintln!("[sasds] wrote {}", path.display());
        }
        None => println!("{}", code.source),
    }
    Ok(())
}

pub(crate) fn test_command(file: &Path, json: bool, runtime: &RuntimeArgs) -> Result<()> {
    let pipeline = prepare(runtime)?;
    let session = pipeline.test(&read_module(file)?)?;
    let report = session
        .test_report
        .as_ref()
        .ok_or_else(|| anyhow!("validation produced no report"))?;

    if json {
        let rendered =
            serde_json::to_string_pretty(report).context("failed serializing test report")?;
        println!("{rendered}");
    } else {
        print!("{}", render_report(report, true));
    }

    if report.failed > 0 {
        return Err(anyhow!(
            "{} of {} harness checks failed for {}",
            report.failed,
            report.passed + report.failed,
            file.display()
        ));
    }
    Ok(())
}

pub(crate) fn review_command(
    file: &Path,
    output: Option<&Path>,
    runtime: &RuntimeArgs,
) -> Result<()> {
    let pipeline = prepare(runtime)?;
    let session = pipeline.test(&read_module(file)?)?;
    let session = pipeline.review(&session)?;
    let review = session
        .review
        .as_ref()
        .ok_or_else(|| anyhow!("review produced no report"))?;

    print!("{}", review.to_markdown());

    if let Some(path) = output {
        match &review.refined_code {
            Some(refined) => {
                fs::write(path, refined)
                    .with_context(|| format!("failed writing {}", path.display()))?;
                eprintln!("[sasds] wrote refined module to {}", path.display());
            }
            None => eprintln!("[sasds] reviewer produced no refined module; nothing written"),
        }
    }
    Ok(())
}

pub(crate) fn run_command(
    requirement: &str,
    attach: Option<&Path>,
    export: Option<&Path>,
    json: bool,
    runtime: &RuntimeArgs,
) -> Result<()> {
    let pipeline = prepare(runtime)?;
    let session = pipeline.run(&requirement_text(requirement, attach)?)?;

    if json {
        println!("{}", render_session_json(&session)?);
    } else {
        print!("{}", render_session(&session));
    }

    if let Some(path) = export {
        export_to_path(&session, path)?;
        eprintln!("[sasds] exported {}", path.display());
    }
    Ok(())
}

pub(crate) fn harness_command(file: &Path) -> Result<()> {
    let source = fs::read_to_string(file)
        .with_context(|| format!("failed reading module {}", file.display()))?;
    print!("{}", synthesize(&source));
    Ok(())
}

fn render_report(report: &TestReport, with_log: bool) -> String {
    let mut out = format!(
        "passed: {}\nfailed: {}\nsuccess rate: {:.1}%\n",
        report.passed, report.failed, report.success_rate
    );
    if !report.failures.is_empty() {
        out.push_str("failures:\n");
        for line in report.failures.lines() {
            out.push_str(&format!("  {line}\n"));
        }
    }
    if with_log {
        out.push_str("\n--- log ---\n");
        out.push_str(report.log.trim_end());
        out.push('\n');
    }
    out
}

fn render_session(session: &Session) -> String {
    let mut out = String::new();
    if let Some(analysis) = &session.analysis {
        out.push_str("== analysis ==\n");
        for task in &analysis.tasks {
            out.push_str(&format!("- {task}\n"));
        }
        let libraries: Vec<&str> = analysis.libraries.iter().map(String::as_str).collect();
        out.push_str(&format!("libraries: {}\n\n", libraries.join(", ")));
    }
    if let Some(code) = &session.code {
        out.push_str("== main.py ==\n");
        out.push_str(code.source.trim_end());
        out.push_str("\n\n");
    }
    if let Some(report) = &session.test_report {
        out.push_str("== tests ==\n");
        out.push_str(&render_report(report, false));
        out.push('\n');
    }
    if let Some(review) = &session.review {
        out.push_str("== review ==\n");
        out.push_str(review.summary.trim());
        out.push('\n');
        if review.refined_code.is_some() {
            out.push_str("(refined module available; use --export to save it)\n");
        }
    }
    out
}

fn render_session_json(session: &Session) -> Result<String> {
    let stages: serde_json::Map<String, serde_json::Value> = session
        .notes
        .iter()
        .map(|note| (note.stage.to_string(), json!(note.source.describe())))
        .collect();
    let value = json!({
        "requirement": session.requirement,
        "analysis": session.analysis,
        "code": session.code.as_ref().map(|code| code.source.as_str()),
        "test_report": session.test_report,
        "review": session.review,
        "stages": stages,
    });
    serde_json::to_string_pretty(&value).context("failed serializing session")
}
