use once_cell::sync::Lazy;
use regex::Regex;

use super::StatementKind;

const RETURN_MARKER: &str = r"(?:\?\s*=\s*)?";
const CALL_TARGET: &str = r"call\s+(?:\w+.){0,2}\w+";
const NO_ARGS: &str = r"\s*\(\s*\)";
const PLACEHOLDER_ARGS: &str = r"\s*\(\s*\?\s*(?:,\s*\?\s*)*\)";

/// The six procedure-call shapes, tried in order; the first full match wins.
static PROCEDURE_CALL_FORMS: Lazy<Vec<Regex>> = Lazy::new(|| {
    let bare = format!("{RETURN_MARKER}{CALL_TARGET}");
    [
        format!("{bare}{NO_ARGS}"),
        format!("{bare}{PLACEHOLDER_ARGS}"),
        bare.clone(),
        format!(r"\{{\s*{bare}\s*\}}"),
        format!(r"\{{\s*{bare}{PLACEHOLDER_ARGS}\s*\}}"),
        format!(r"\{{\s*{bare}{NO_ARGS}\s*\}}"),
    ]
    .iter()
    .map(|form| Regex::new(&format!("(?i)^(?:{form})$")).expect("procedure call pattern"))
    .collect()
});

const DML_KEYWORDS: [&str; 3] = ["insert", "update", "delete"];

pub fn is_procedure_call(sql: &str) -> bool {
    PROCEDURE_CALL_FORMS.iter().any(|form| form.is_match(sql))
}

/// Substring test on the lowercased text. A SELECT that mentions one of the
/// DML keywords anywhere (an identifier such as `last_update` included) is
/// reported as DML.
pub fn is_dml(sql: &str) -> bool {
    let lower = sql.to_lowercase();
    DML_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

/// Decides the execution path for already-normalized SQL text.
pub fn classify(sql: &str) -> StatementKind {
    if is_procedure_call(sql) {
        StatementKind::ProcedureCall
    } else if is_dml(sql) {
        StatementKind::Dml
    } else {
        StatementKind::Select
    }
}
