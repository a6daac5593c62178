use crate::Stage;
use anyhow::{Context, Result, anyhow};
use sasds_llm::{CompletionRequest, extract_json_object};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Characters of an attached file that are folded into the requirement.
pub const ATTACHMENT_LIMIT: usize = 1000;

pub const DEFAULT_INPUT_OUTPUT: &str =
    "Input: User provided data or files. Output: Processed results";
pub const DEFAULT_CONSTRAINTS: &str = "Must be efficient and handle edge cases";

const DEFAULT_TASKS: [&str; 4] = [
    "Understand requirement",
    "Design solution",
    "Implement code",
    "Test implementation",
];

/// Keyword groups, tasks they add and the library they pull in.
const KEYWORD_RULES: &[(&[&str], &[&str], &str)] = &[
    (&["csv"], &["Read CSV file", "Parse data", "Process data"], "pandas"),
    (&["json"], &["Read JSON file", "Parse JSON"], "json"),
    (
        &["database", "sql"],
        &["Connect to database", "Query data", "Store results"],
        "sqlite3",
    ),
    (
        &["plot", "graph", "visualiz"],
        &["Visualize data", "Create chart"],
        "matplotlib",
    ),
    (&["file"], &["Read file", "Write file", "Handle errors"], "os"),
];

const SYSTEM_PROMPT: &str = "You are a senior software analyst. You break software requirements into \
implementation tasks for a single Python module. Reply with one JSON object and nothing else.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub tasks: Vec<String>,
    pub libraries: BTreeSet<String>,
    pub input_output: String,
    pub constraints: String,
}

/// Appends the head of an uploaded file to a requirement.
pub fn attach_file(requirement: &str, name: &str, content: &str) -> String {
    let head: String = content.chars().take(ATTACHMENT_LIMIT).collect();
    format!("{requirement}\n\n[Uploaded file: {name}]\n{head}")
}

/// Keyword-table analysis used when no model answers.
pub fn fallback_analysis(requirement: &str) -> Analysis {
    let lowered = requirement.to_lowercase();

    let mut tasks = Vec::new();
    let mut libraries: BTreeSet<String> = ["os", "sys"].into_iter().map(String::from).collect();
    for (keywords, rule_tasks, library) in KEYWORD_RULES {
        if keywords.iter().any(|keyword| lowered.contains(keyword)) {
            tasks.extend(rule_tasks.iter().map(|task| task.to_string()));
            libraries.insert(library.to_string());
        }
    }
    if tasks.is_empty() {
        tasks = DEFAULT_TASKS.iter().map(|task| task.to_string()).collect();
    }

    Analysis {
        tasks,
        libraries,
        input_output: DEFAULT_INPUT_OUTPUT.to_string(),
        constraints: DEFAULT_CONSTRAINTS.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequirementAnalyzer;

impl Stage for RequirementAnalyzer {
    type Input = str;
    type Output = Analysis;
    const PURPOSE: &'static str = "analyze";

    fn request(&self, requirement: &str) -> CompletionRequest {
        let prompt = format!(
            "Analyze the following software requirement and break it down into:\n\
             1. Functional tasks (what needs to be done)\n\
             2. Required Python libraries\n\
             3. Input/output specification\n\
             4. Constraints or considerations\n\n\
             Requirement: {requirement}\n\n\
             Respond in JSON format:\n\
             {{\n  \"tasks\": [\"task1\", \"task2\"],\n  \"libraries\": [\"library1\"],\n  \
             \"input_output\": \"description\",\n  \"constraints\": \"any constraints\"\n}}\n"
        );
        CompletionRequest {
            purpose: Self::PURPOSE.to_string(),
            system: SYSTEM_PROMPT.to_string(),
            prompt,
        }
    }

    fn interpret(&self, reply: &str, _requirement: &str) -> Result<Analysis> {
        parse_analysis_reply(reply)
    }

    fn local(&self, requirement: &str) -> Analysis {
        fallback_analysis(requirement)
    }
}

/// Reads the JSON object embedded in a model reply. Field shapes are taken
/// leniently; missing text fields get the fixed defaults.
pub fn parse_analysis_reply(reply: &str) -> Result<Analysis> {
    let json = extract_json_object(reply).ok_or_else(|| anyhow!("reply holds no JSON object"))?;
    let value: Value = serde_json::from_str(json).context("analysis reply is not valid JSON")?;
    let object = value
        .as_object()
        .ok_or_else(|| anyhow!("analysis reply is not a JSON object"))?;

    let tasks: Vec<String> = string_list(object.get("tasks"));
    if tasks.is_empty() {
        return Err(anyhow!("analysis reply lists no tasks"));
    }
    let libraries = string_list(object.get("libraries"))
        .into_iter()
        .collect::<BTreeSet<_>>();

    Ok(Analysis {
        tasks,
        libraries,
        input_output: text_field(object.get("input_output"))
            .unwrap_or_else(|| DEFAULT_INPUT_OUTPUT.to_string()),
        constraints: text_field(object.get("constraints"))
            .unwrap_or_else(|| DEFAULT_CONSTRAINTS.to_string()),
    })
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| text_field(Some(item)))
        .collect()
}

fn text_field(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::Null => return None,
        Value::String(text) => text.trim().to_string(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}
