use super::entry_point::{EntryPointDetector, PatternDetector};
use super::{quote, LanguageFamily, LanguageSupport};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::Value;

/// Unnumbered `ARG` is used when a test case has one argument, `ARG1`..`ARGn` otherwise.
pub const PLACEHOLDER_PREFIX: &str = "ARG";

lazy_static! {
    static ref DETECTOR: PatternDetector =
        PatternDetector::new(&[r"void\s+(\w+)\s*\(", r"public\s+(\w+)\s*\("]);
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\bARG(\d*)\b").expect("placeholder pattern must be a valid regex");
}

pub struct CSharp;

impl LanguageSupport for CSharp {
    fn family(&self) -> LanguageFamily {
        LanguageFamily::CompiledCLike
    }

    fn entry_point_detector(&self) -> &dyn EntryPointDetector {
        &*DETECTOR
    }

    fn render_value(&self, value: &Value) -> String {
        match value {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => quote(s),
            Value::Array(items) => {
                let items: Vec<String> = items.iter().map(|v| self.render_value(v)).collect();
                format!("{{{}}}", items.join(","))
            }
            Value::Object(_) => quote(&value.to_string()),
        }
    }

    /// The submission keeps its own `Main`; only the placeholders change.
    fn generate_harness(&self, source: &str, _entry_point: &str, args: &[String]) -> String {
        substitute_placeholders(source, args)
    }
}

/// Replace placeholder tokens with argument literals. Tokens without a
/// matching argument are left alone so the compiler reports them.
pub fn substitute_placeholders(source: &str, args: &[String]) -> String {
    PLACEHOLDER
        .replace_all(source, |caps: &Captures| {
            let index = &caps[1];
            let replacement = if index.is_empty() {
                if args.len() == 1 {
                    args.first()
                } else {
                    None
                }
            } else {
                index
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n >= 1)
                    .and_then(|n| args.get(n - 1))
            };
            replacement.cloned().unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REVERSE: &str = r#"using System;
class Program {
    static int ReverseInteger(int x) { return 21; }
    static void Main() {
        int num = ARG;
        Console.WriteLine(ReverseInteger(num));
    }
}"#;

    #[test]
    fn test_detects_void_method() {
        assert_eq!(CSharp.normalize_entry_point(REVERSE).unwrap(), "Main");
    }

    #[test]
    fn test_detects_public_method() {
        let source = "class Solution {\n  public Solution() {}\n}";
        assert_eq!(CSharp.normalize_entry_point(source).unwrap(), "Solution");
    }

    #[test]
    fn test_single_placeholder() {
        let program = CSharp.generate_harness(REVERSE, "Main", &["120".to_string()]);
        assert!(program.contains("int num = 120;"));
        assert!(!program.contains("ARG"));
    }

    #[test]
    fn test_numbered_placeholders() {
        let source = "int[] nums = ARG1; int target = ARG2; var ARGS = 0;";
        let program = substitute_placeholders(source, &["{2,7,11,15}".to_string(), "9".to_string()]);
        assert_eq!(program, "int[] nums = {2,7,11,15}; int target = 9; var ARGS = 0;");
    }

    #[test]
    fn test_numbered_tokens_do_not_collide() {
        let args: Vec<String> = (1..=10).map(|n| n.to_string()).collect();
        let program = substitute_placeholders("ARG1 ARG10", &args);
        assert_eq!(program, "1 10");
    }

    #[test]
    fn test_unknown_placeholder_left_in_place() {
        let program = substitute_placeholders("ARG3", &["1".to_string(), "2".to_string()]);
        assert_eq!(program, "ARG3");
    }

    #[test]
    fn test_render_brace_arrays() {
        let value: Value = serde_json::from_str(r#"[[1,2],[3]]"#).unwrap();
        assert_eq!(CSharp.render_value(&value), "{{1,2},{3}}");
        let words: Value = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(CSharp.render_value(&words), r#"{"a","b"}"#);
    }
}
