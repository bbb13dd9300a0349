// Prompt-building utilities shared by every pipeline stage.
// Stage-specific prompt text lives in pipeline/prompts.rs.

use std::collections::HashMap;

/// Substitutes `{name}` for each of `variables` with its value in `values`.
///
/// Only declared variables are replaced, so literal braces elsewhere in the
/// template (JSON examples and the like) pass through untouched. Callers
/// resolve every variable before rendering; a variable absent from `values`
/// is left as-is.
pub fn render_template(
    template: &str,
    variables: &[String],
    values: &HashMap<String, String>,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let value = tail.find('}').and_then(|close| {
            let name = &tail[1..close];
            variables
                .iter()
                .any(|v| v == name)
                .then(|| values.get(name))
                .flatten()
                .map(|value| (value, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
