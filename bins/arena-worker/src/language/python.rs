use super::entry_point::{EntryPointDetector, PatternDetector};
use super::{quote, LanguageFamily, LanguageSupport};
use lazy_static::lazy_static;
use serde_json::Value;

lazy_static! {
    static ref DETECTOR: PatternDetector = PatternDetector::new(&[r"def\s+(\w+)\s*\("]);
}

pub struct Python;

impl LanguageSupport for Python {
    fn family(&self) -> LanguageFamily {
        LanguageFamily::PythonLike
    }

    fn entry_point_detector(&self) -> &dyn EntryPointDetector {
        &*DETECTOR
    }

    fn render_value(&self, value: &Value) -> String {
        match value {
            Value::Null => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => quote(s),
            Value::Array(items) => {
                let items: Vec<String> = items.iter().map(|v| self.render_value(v)).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Object(map) => {
                let entries: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{}: {}", quote(k), self.render_value(v)))
                    .collect();
                format!("{{{}}}", entries.join(", "))
            }
        }
    }

    fn generate_harness(&self, source: &str, entry_point: &str, args: &[String]) -> String {
        format!("{}\nprint({}({}))\n", source, entry_point, args.join(", "))
    }
}
