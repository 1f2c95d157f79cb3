/// Per-language behavior behind one dispatch point.
///
/// Every supported language belongs to exactly one family, and each family
/// implements the four capabilities the grader needs: finding the entry
/// point, rendering argument literals, generating the harness program and
/// building the toolchain invocation. Adding a language means adding one
/// `LanguageSupport` implementation, not touching the grader or judge.
pub mod csharp;
pub mod entry_point;
pub mod javascript;
pub mod python;

use crate::config::LanguageConfig;
use crate::error::GradeError;
use crate::harness::{self, ExecutionPlan};
use crate::marshal::Literal;
use arena_common::types::Language;
use entry_point::EntryPointDetector;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageFamily {
    /// Interpreted, the harness appends a call-and-print statement.
    JavaScriptLike,
    /// Interpreted, the harness appends a call-and-print statement.
    PythonLike,
    /// Compiled, the harness substitutes placeholders the submission left in place.
    CompiledCLike,
}

impl LanguageFamily {
    pub fn of(language: Language) -> Self {
        match language {
            Language::JavaScript => LanguageFamily::JavaScriptLike,
            Language::Python => LanguageFamily::PythonLike,
            Language::CSharp => LanguageFamily::CompiledCLike,
        }
    }

    pub fn support(&self) -> &'static dyn LanguageSupport {
        match self {
            LanguageFamily::JavaScriptLike => &javascript::JavaScript,
            LanguageFamily::PythonLike => &python::Python,
            LanguageFamily::CompiledCLike => &csharp::CSharp,
        }
    }
}

pub fn support_for(language: Language) -> &'static dyn LanguageSupport {
    LanguageFamily::of(language).support()
}

pub trait LanguageSupport: Send + Sync {
    fn family(&self) -> LanguageFamily;

    fn entry_point_detector(&self) -> &dyn EntryPointDetector;

    /// Render one JSON value in the language's literal syntax.
    fn render_value(&self, value: &Value) -> String;

    /// Produce the full program text for one test case.
    fn generate_harness(&self, source: &str, entry_point: &str, args: &[String]) -> String;

    fn normalize_entry_point(&self, source: &str) -> Result<String, GradeError> {
        self.entry_point_detector()
            .detect(source)
            .ok_or(GradeError::NoEntryPointFound)
    }

    fn marshal_argument(&self, literal: &Literal) -> String {
        match literal {
            Literal::Array(items) => self.render_value(&Value::Array(items.clone())),
            Literal::Number(text) => text.clone(),
            Literal::Text(text) => self.render_value(&Value::String(text.clone())),
        }
    }

    fn build_run_command(&self, config: &LanguageConfig, program: String) -> ExecutionPlan {
        harness::plan_from_config(config, program)
    }
}

/// JSON string escaping is valid string-literal syntax in all supported languages.
pub(crate) fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{}\"", text))
}
