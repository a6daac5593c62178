use crate::Stage;
use crate::analyzer::Analysis;
use anyhow::{Result, anyhow};
use sasds_llm::{CompletionRequest, normalize_code_reply};
use serde::{Deserialize, Serialize};

const SYSTEM_PROMPT: &str = "You are an expert Python engineer. Return only runnable Python source \
for a single module. No prose, no markdown.";

const HEADER_TASKS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
}

impl Language {
    pub fn extension(self) -> &'static str {
        match self {
            Language::Python => "py",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedCode {
    pub source: String,
    pub language: Language,
}

impl GeneratedCode {
    pub fn python(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            language: Language::Python,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CodeGenerator;

impl Stage for CodeGenerator {
    type Input = Analysis;
    type Output = GeneratedCode;
    const PURPOSE: &'static str = "generate";

    fn request(&self, analysis: &Analysis) -> CompletionRequest {
        let tasks = analysis
            .tasks
            .iter()
            .map(|task| format!("- {task}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Generate production-ready Python code that accomplishes the following tasks:\n\n\
             {tasks}\n\n\
             Use these libraries: {libraries}\n\
             Input/output: {io}\n\
             Constraints: {constraints}\n\n\
             Requirements:\n\
             1. Write clean, modular and commented code\n\
             2. Include error handling and input validation\n\
             3. Organize the code in functions with docstrings\n\
             4. Make it testable\n\
             5. Include a main() function guarded by if __name__ == \"__main__\"\n\n\
             Generate only the Python code, no explanations.",
            libraries = library_list(analysis),
            io = analysis.input_output,
            constraints = analysis.constraints,
        );
        CompletionRequest {
            purpose: Self::PURPOSE.to_string(),
            system: SYSTEM_PROMPT.to_string(),
            prompt,
        }
    }

    fn interpret(&self, reply: &str, _analysis: &Analysis) -> Result<GeneratedCode> {
        let source = normalize_code_reply(reply)?;
        let source = strip_language_line(&source);
        if source.trim().is_empty() {
            return Err(anyhow!("LLM returned only a language tag"));
        }
        Ok(GeneratedCode::python(source))
    }

    fn local(&self, analysis: &Analysis) -> GeneratedCode {
        GeneratedCode::python(template_code(analysis))
    }
}

/// Some models answer with a bare `python` line in front of the code.
fn strip_language_line(source: &str) -> String {
    match source.split_once('\n') {
        Some((first, rest)) if matches!(first.trim(), "python" | "py" | "python3") => {
            rest.to_string()
        }
        _ => source.to_string(),
    }
}

fn library_list(analysis: &Analysis) -> String {
    if analysis.libraries.is_empty() {
        return "os".to_string();
    }
    analysis
        .libraries
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Keeps header text inside the module docstring.
fn docstring_safe(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace("\"\"\"", "'''")
}

/// A runnable module skeleton shaped by the analysis.
pub fn template_code(analysis: &Analysis) -> String {
    let tasks = analysis
        .tasks
        .iter()
        .take(HEADER_TASKS)
        .map(|task| docstring_safe(task))
        .collect::<Vec<_>>()
        .join(", ");
    let libraries = docstring_safe(&library_list(analysis));

    TEMPLATE
        .replace("@@TASKS@@", &tasks)
        .replace("@@LIBRARIES@@", &libraries)
}

const TEMPLATE: &str = r#""""
Generated Python Module
Tasks: @@TASKS@@
Libraries: @@LIBRARIES@@
"""

import os
import sys
from typing import Any, Dict


def read_input() -> Dict[str, Any]:
    """Read and validate input."""
    try:
        print("Enter input data or file path:")
        user_input = input().strip()
        return {"input": user_input}
    except Exception as e:
        print(f"Error reading input: {e}")
        return {}


def process_data(data: Dict[str, Any]) -> Dict[str, Any]:
    """Process the input data."""
    try:
        print(f"Processing: {data}")
        return {"status": "success", "data": data, "processed": True}
    except Exception as e:
        print(f"Error processing data: {e}")
        return {"status": "error", "message": str(e)}


def format_output(result: Dict[str, Any]) -> str:
    """Format the output."""
    if result.get("status") == "success":
        return f"Success: {result}"
    return f"Error: {result.get('message', 'Unknown error')}"


def main():
    """Entry point."""
    print("=" * 50)
    print("Python Application Started")
    print("=" * 50)

    input_data = read_input()
    result = process_data(input_data)
    print(format_output(result))

    print("=" * 50)
    print("Application completed successfully")
    print("=" * 50)


if __name__ == "__main__":
    main()
"#;
