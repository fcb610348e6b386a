//! Heuristic blindspot detection
//!
//! Two sources: phrases in a response that point at something unknown, and
//! per-task checks of the chunks themselves.

use crate::terms::{is_stopword, tokens};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use strata_core::TaskType;

/// Undefined-symbol blindspots reported per critique.
const MAX_SYMBOL_BLINDSPOTS: usize = 5;

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(pattern = p, error = %e, "Invalid blindspot pattern");
                None
            }
        })
        .collect()
}

/// Response phrasing that names a missing term in capture group 1.
static RESPONSE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)[`'\x22]?\b([A-Za-z_][A-Za-z0-9_.]*)[`'\x22]?\s+(?:is|was|are)\s+(?:undefined|not defined|not found|missing)\b",
        r"(?i)\b(?:undefined|unknown)\s+(?:variable|function|symbol|type|module|reference|class|method|name)\s+[`'\x22]?([A-Za-z_][A-Za-z0-9_.]*)",
        r"(?i)\b(?:missing|cannot find|could not find)\s+(?:(?:variable|function|symbol|type|module|reference|class|method)\s+)?[`'\x22]?([A-Za-z_][A-Za-z0-9_.]*)",
        r"(?i)\bneed more context\s+(?:about|on|for|regarding)\s+(?:the\s+)?[`'\x22]?([A-Za-z_][A-Za-z0-9_.]*)",
    ])
});

/// Free function calls: `name(` not preceded by `.`, `:` or a word char.
static CALL_PATTERN: Lazy<Vec<Regex>> =
    Lazy::new(|| compile(&[r"(?:^|[^.:\w])([A-Za-z_][A-Za-z0-9_]*)\s*\("]));

/// Definitions and imports; capture group 1 is the bound name.
static DEFINITION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\b(?:fn|def|function|class|struct|enum|trait|type|interface|const|static|let|var|macro_rules!)\s+([A-Za-z_][A-Za-z0-9_]*)",
        r"\b(?:use|import)\s+[\w:.]*?([A-Za-z_][A-Za-z0-9_]*)\s*;?\s*$",
        r"\bimport\s+([A-Za-z_][A-Za-z0-9_]*)",
        r"\bfrom\s+[\w.]+\s+import\s+([A-Za-z_][A-Za-z0-9_]*)",
        r"(?m)^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=",
    ])
});

/// Terms too generic to report as missing.
const IGNORED_TERMS: &[&str] = &[
    "context", "information", "more", "some", "something", "data", "it", "this", "that", "value",
];

/// Calls that never need a definition in context.
const BUILTIN_CALLS: &[&str] = &[
    "if", "for", "while", "match", "return", "loop", "switch", "catch", "fn", "def", "function",
    "print", "println", "eprintln", "format", "write", "writeln", "vec", "assert", "assert_eq",
    "assert_ne", "panic", "todo", "unimplemented", "dbg", "matches", "some", "ok", "err", "box",
    "len", "range", "str", "int", "float", "list", "dict", "set", "tuple", "isinstance", "super",
    "self", "open", "sorted", "enumerate", "zip", "map", "filter", "min", "max", "sum", "abs",
    "require", "console", "typeof", "new", "sizeof", "not", "and", "or", "in", "with", "await",
    "async", "lambda", "where", "select", "from", "values", "count",
];

const PLANNING_QUERY_TERMS: &[&str] = &[
    "requirement", "requirements", "architecture", "design", "plan", "roadmap", "spec",
];
const PLANNING_CONTEXT_TERMS: &[&str] = &[
    "requirement", "requirements", "architecture", "design", "component", "constraint",
    "constraints", "milestone", "scope", "goal", "goals",
];

const DEBUG_QUERY_TERMS: &[&str] = &[
    "error", "bug", "crash", "fail", "failing", "failure", "panic", "exception", "broken",
];
const DEBUG_CONTEXT_TERMS: &[&str] = &[
    "error", "stack", "traceback", "panic", "exception", "backtrace", "stderr", "failed",
];

/// Terms a response says are unknown that the chunks never mention.
pub(crate) fn response_blindspots(response: &str, context: &str) -> Vec<String> {
    let context_lower = context.to_lowercase();
    let mut terms = BTreeSet::new();
    for re in RESPONSE_PATTERNS.iter() {
        for caps in re.captures_iter(response) {
            let Some(term) = caps.get(1).map(|m| m.as_str().trim_end_matches('.')) else {
                continue;
            };
            let lower = term.to_lowercase();
            if lower.len() < 2 || is_stopword(&lower) || IGNORED_TERMS.contains(&lower.as_str()) {
                continue;
            }
            if !context_lower.contains(&lower) {
                terms.insert(term.to_string());
            }
        }
    }
    terms
        .into_iter()
        .map(|t| format!("Missing context for `{}`", t))
        .collect()
}

/// Symbols called in the chunks that are never defined or imported there.
pub(crate) fn undefined_symbols(context: &str) -> Vec<String> {
    let mut defined = BTreeSet::new();
    for line in context.lines() {
        for re in DEFINITION_PATTERNS.iter() {
            for caps in re.captures_iter(line) {
                if let Some(name) = caps.get(1) {
                    defined.insert(name.as_str().to_string());
                }
            }
        }
    }

    let mut called = BTreeSet::new();
    for re in CALL_PATTERN.iter() {
        for caps in re.captures_iter(context) {
            if let Some(name) = caps.get(1) {
                called.insert(name.as_str().to_string());
            }
        }
    }

    called
        .into_iter()
        .filter(|name| !defined.contains(name))
        .filter(|name| !BUILTIN_CALLS.contains(&name.to_lowercase().as_str()))
        .filter(|name| !name.chars().next().is_some_and(char::is_uppercase))
        .take(MAX_SYMBOL_BLINDSPOTS)
        .collect()
}

fn mentions_any(text: &str, vocabulary: &[&str]) -> bool {
    tokens(text).any(|t| vocabulary.contains(&t.as_str()))
}

/// Task-specific checks of the chunks against the query.
pub(crate) fn task_blindspots(task_type: TaskType, query: &str, context: &str) -> Vec<String> {
    match task_type {
        TaskType::Code => undefined_symbols(context)
            .into_iter()
            .map(|s| format!("`{}` is called but not defined or imported in context", s))
            .collect(),
        TaskType::Planning => {
            if mentions_any(query, PLANNING_QUERY_TERMS) && !mentions_any(context, PLANNING_CONTEXT_TERMS)
            {
                vec!["No requirements or architecture context provided".to_string()]
            } else {
                Vec::new()
            }
        }
        TaskType::Debugging => {
            let mut out: Vec<String> = undefined_symbols(context)
                .into_iter()
                .map(|s| format!("`{}` is called but not defined or imported in context", s))
                .collect();
            if mentions_any(query, DEBUG_QUERY_TERMS) && !mentions_any(context, DEBUG_CONTEXT_TERMS) {
                out.push("No error output or stack trace in context".to_string());
            }
            out
        }
        TaskType::Documentation | TaskType::General => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_blindspots() {
        let response = "The function `load_profile` is undefined here, and I need more context about \
                        ProfileStore. Also missing variable retry_limit.";
        let found = response_blindspots(response, "fn retry_limit() -> u32 { 3 }");
        assert_eq!(
            found,
            vec![
                "Missing context for `ProfileStore`".to_string(),
                "Missing context for `load_profile`".to_string(),
            ]
        );
    }

    #[test]
    fn test_response_terms_present_in_context_are_ignored() {
        let found = response_blindspots("`parse` is not defined", "pub fn parse(input: &str) {}");
        assert!(found.is_empty());
        assert!(response_blindspots("need more context", "").is_empty());
    }

    #[test]
    fn test_undefined_symbols() {
        let context = "use crate::io::read_all;\n\
                       fn run() {\n    let data = read_all(path);\n    validate(&data);\n    \
                       helper.call(1);\n    Vec::new();\n    println!(\"x\");\n}\n";
        assert_eq!(undefined_symbols(context), vec!["validate".to_string()]);
    }

    #[test]
    fn test_python_definitions_and_imports() {
        let context = "from utils import clean\nimport json\n\ndef process(x):\n    \
                       return clean(json.loads(x)) + transform(x)\n";
        assert_eq!(undefined_symbols(context), vec!["transform".to_string()]);
    }

    #[test]
    fn test_planning_blindspot() {
        let found = task_blindspots(TaskType::Planning, "What is the architecture plan?", "fn main() {}");
        assert_eq!(found.len(), 1);
        let covered = task_blindspots(
            TaskType::Planning,
            "What is the architecture plan?",
            "The architecture has three components.",
        );
        assert!(covered.is_empty());
    }

    #[test]
    fn test_debugging_blindspot() {
        let found = task_blindspots(TaskType::Debugging, "why does the build fail", "some notes");
        assert_eq!(found, vec!["No error output or stack trace in context".to_string()]);
        assert!(task_blindspots(TaskType::General, "why does it fail", "").is_empty());
    }
}
