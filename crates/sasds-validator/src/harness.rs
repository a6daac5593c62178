/// File name the subject source is written to; the harness imports it as `main`.
pub const SUBJECT_FILE: &str = "main.py";
/// File name of the synthesized pytest module.
pub const HARNESS_FILE: &str = "test_main.py";
/// Maximum number of characters of the subject embedded into the harness.
pub const EMBED_LIMIT: usize = 2000;

const SOURCE_SLOT: &str = "@@SUBJECT_SOURCE@@";
const TRUNCATED_SLOT: &str = "@@SUBJECT_TRUNCATED@@";

const TEMPLATE: &str = r#""""
Auto-generated validation harness for the subject module `main`.
"""

import io
import os
import py_compile
import sys
import tempfile
from contextlib import redirect_stderr, redirect_stdout

import pytest

SUBJECT_SOURCE = @@SUBJECT_SOURCE@@
SUBJECT_TRUNCATED = @@SUBJECT_TRUNCATED@@
SUBJECT_PATH = os.path.join(os.path.dirname(os.path.abspath(__file__)), "main.py")

try:
    import main

    HAS_MAIN = True
    IMPORT_ERROR = ""
except BaseException as exc:
    main = None
    HAS_MAIN = False
    IMPORT_ERROR = f"{type(exc).__name__}: {exc}"


def _entry_point():
    if not HAS_MAIN:
        pytest.skip(f"Module import failed: {IMPORT_ERROR}")
    entry = getattr(main, "main", None)
    if entry is None:
        pytest.skip("No main function defined")
    if not callable(entry):
        pytest.skip("main is defined but not callable")
    return entry


class TestCodeStructure:
    """Import and syntax checks."""

    def test_module_imports(self):
        if not HAS_MAIN:
            pytest.skip(f"Module import failed: {IMPORT_ERROR}")

    def test_no_syntax_errors(self):
        with tempfile.TemporaryDirectory() as scratch:
            if SUBJECT_TRUNCATED:
                source_path = SUBJECT_PATH
            else:
                source_path = os.path.join(scratch, "subject.py")
                with open(source_path, "w", encoding="utf-8") as handle:
                    handle.write(SUBJECT_SOURCE)
            try:
                py_compile.compile(
                    source_path,
                    cfile=os.path.join(scratch, "subject.pyc"),
                    doraise=True,
                )
            except py_compile.PyCompileError as exc:
                pytest.fail(f"Syntax error found: {exc.msg}")


class TestExecution:
    """Entry point presence and a captured run of main()."""

    def test_main_function_exists(self):
        _entry_point()

    def test_main_function_execution(self):
        entry = _entry_point()
        stdout = io.StringIO()
        stderr = io.StringIO()
        saved_stdin = sys.stdin
        sys.stdin = io.StringIO("")
        try:
            with redirect_stdout(stdout), redirect_stderr(stderr):
                entry()
        except (Exception, SystemExit) as exc:
            pytest.skip(f"main() raised {type(exc).__name__}: {exc}")
        finally:
            sys.stdin = saved_stdin


class TestFunctionality:
    """Public surface of the module."""

    def test_defined_functions(self):
        if not HAS_MAIN:
            pytest.skip("Module not imported")
        functions = [
            name
            for name in dir(main)
            if not name.startswith("_") and callable(getattr(main, name))
        ]
        if not functions:
            pytest.skip("No functions defined in module")


def test_overall_code_quality():
    if not HAS_MAIN:
        pytest.skip(f"Import failed: {IMPORT_ERROR}")
"#;

/// The bounded copy of `source` that is embedded into the harness, and
/// whether anything was cut off.
pub fn embedded_copy(source: &str) -> (&str, bool) {
    match source.char_indices().nth(EMBED_LIMIT) {
        Some((cut, _)) => (&source[..cut], true),
        None => (source, false),
    }
}

/// Builds the pytest module that validates `source` once it is saved as
/// [`SUBJECT_FILE`] next to the harness. Output depends only on `source`.
pub fn synthesize(source: &str) -> String {
    let (embedded, truncated) = embedded_copy(source);
    let flag = if truncated { "True" } else { "False" };

    TEMPLATE
        .replacen(TRUNCATED_SLOT, flag, 1)
        .replacen(SOURCE_SLOT, &python_string_literal(embedded), 1)
}

/// Double-quoted Python literal. Non-ASCII text is kept as-is; the harness
/// file is UTF-8.
fn python_string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
