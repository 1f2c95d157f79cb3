use super::entry_point::{EntryPointDetector, PatternDetector};
use super::{LanguageFamily, LanguageSupport};
use lazy_static::lazy_static;
use serde_json::Value;

lazy_static! {
    // `function name(` first, then `const name = (`.
    static ref DETECTOR: PatternDetector = PatternDetector::new(&[
        r"function\s+(\w+)\s*\(",
        r"const\s+(\w+)\s*=\s*\(",
    ]);
}

pub struct JavaScript;

impl LanguageSupport for JavaScript {
    fn family(&self) -> LanguageFamily {
        LanguageFamily::JavaScriptLike
    }

    fn entry_point_detector(&self) -> &dyn EntryPointDetector {
        &*DETECTOR
    }

    fn render_value(&self, value: &Value) -> String {
        // JSON is a subset of JavaScript expression syntax.
        value.to_string()
    }

    fn generate_harness(&self, source: &str, entry_point: &str, args: &[String]) -> String {
        format!("{}\nconsole.log({}({}));\n", source, entry_point, args.join(", "))
    }
}
