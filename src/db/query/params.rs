use once_cell::sync::Lazy;
use regex::Regex;

use crate::db::error::{Error, Result};
use crate::db::session::{normalize_name, Binding, Param};

/// Colon followed by any run of word characters. A bare `:` matches too; it
/// can only be bound under the empty name.
static NAMED_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":\w*").expect("named placeholder pattern"));

const PLACEHOLDER_SEPARATOR: &str = ", ";

/// Named placeholders (`:word`, at least one word character) in textual order.
pub fn named_tokens(sql: &str) -> Vec<&str> {
    NAMED_PLACEHOLDER
        .find_iter(sql)
        .map(|token| token.as_str())
        .filter(|token| token.len() > 1)
        .collect()
}

pub fn has_named_tokens(sql: &str) -> bool {
    !named_tokens(sql).is_empty()
}

/// Rewrites every bound `:name` occurrence into positional placeholders and
/// returns the values aligned to them.
///
/// Occurrences are handled left to right. A `Many` binding expands to one `?`
/// per element, joined with `", "`. Tokens with no binding stay in the text
/// untouched and take no slot in the value list.
pub fn resolve<T: Clone + PartialEq>(
    sql: &str,
    bindings: &[(String, Binding<T>)],
) -> Result<(String, Vec<T>)> {
    let canonical = canonical_bindings(bindings)?;

    let mut rewritten = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut last = 0usize;
    for token in NAMED_PLACEHOLDER.find_iter(sql) {
        let Some((_, binding)) = canonical.iter().find(|(name, _)| name == token.as_str()) else {
            continue;
        };
        rewritten.push_str(&sql[last..token.start()]);
        rewritten.push_str(&placeholders(binding.len()));
        values.extend(binding.values().iter().cloned());
        last = token.end();
    }
    rewritten.push_str(&sql[last..]);

    Ok((rewritten, values))
}

/// Collapses the caller's bindings by canonical name. Repeating a name with
/// an equal value is tolerated; a different value is ambiguous.
fn canonical_bindings<T: PartialEq>(
    bindings: &[(String, Binding<T>)],
) -> Result<Vec<(String, &Binding<T>)>> {
    let mut canonical: Vec<(String, &Binding<T>)> = Vec::with_capacity(bindings.len());
    for (name, binding) in bindings {
        let key = normalize_name(name);
        if binding.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "Binding {key} has no values"
            )));
        }
        match canonical.iter().find(|(existing, _)| *existing == key) {
            Some((_, previous)) if *previous == binding => {}
            Some(_) => {
                return Err(Error::InvalidArgument(format!(
                    "Ambiguous duplicate binding for {key}"
                )))
            }
            None => canonical.push((key, binding)),
        }
    }
    Ok(canonical)
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(PLACEHOLDER_SEPARATOR)
}

/// Procedure parameters must be all named or all positional.
pub fn check_uniform_style(params: &[Param]) -> Result<()> {
    let named = params.iter().filter(|param| param.is_named()).count();
    if named > 0 && named < params.len() {
        return Err(Error::InvalidArgument(
            "Cannot combine named parameters with positional ones".to_string(),
        ));
    }
    Ok(())
}

/// Positional values supplied against text that still uses named
/// placeholders are rejected rather than merged.
pub fn check_positional(sql: &str, values: usize) -> Result<()> {
    if values > 0 && has_named_tokens(sql) {
        return Err(Error::InvalidArgument(format!(
            "Positional parameters supplied for a query with named placeholders: {sql}"
        )));
    }
    Ok(())
}

/// Resolves procedure parameters against the call text. Named parameters are
/// substituted like any other binding; positional ones are returned as given.
pub fn resolve_call(sql: &str, params: Vec<Param>) -> Result<(String, Vec<Param>)> {
    check_uniform_style(&params)?;
    if params.first().map_or(true, |param| !param.is_named()) {
        return Ok((sql.to_string(), params));
    }
    let bindings: Vec<(String, Binding<Param>)> = params
        .into_iter()
        .map(|param| (param.name.clone(), Binding::One(param)))
        .collect();
    resolve(sql, &bindings)
}
