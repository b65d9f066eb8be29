// ABOUTME: Minimal `{{ name }}` placeholder rendering for proxy site templates.
// ABOUTME: Unknown or malformed placeholders are errors, never left in the output.

use std::collections::HashMap;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown template variable `{0}`")]
    UnknownVariable(String),

    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),

    #[error("invalid placeholder `{{{{{0}}}}}`")]
    InvalidName(String),
}

/// Replace every `{{ name }}` in `template` with `variables[name]`.
pub fn render(template: &str, variables: &HashMap<String, String>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let close = after_open
            .find("}}")
            .ok_or(TemplateError::Unterminated(offset + open))?;

        let raw = &after_open[..close];
        let name = raw.trim();
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(TemplateError::InvalidName(raw.to_string()));
        }

        let value = variables
            .get(name)
            .ok_or_else(|| TemplateError::UnknownVariable(name.to_string()))?;
        out.push_str(value);

        let consumed = open + 2 + close + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }

    out.push_str(rest);
    Ok(out)
}
