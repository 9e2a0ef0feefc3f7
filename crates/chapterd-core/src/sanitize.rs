//! Filesystem-safe names for library, title and chapter path components.

/// Sanitizes one path component (library name, title, chapter file stem).
///
/// - Replaces NUL, `/`, `\`, control characters, whitespace and the characters
///   SMB/Windows shares reject (`: * ? " < > |`) with `_`
/// - Collapses consecutive underscores
/// - Trims leading/trailing spaces, dots and underscores
/// - Limits length to 255 bytes (Linux NAME_MAX)
pub fn sanitize_component(name: &str) -> String {
    const NAME_MAX: usize = 255;

    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;

    for c in name.chars() {
        let replace = c == '\0'
            || c == '/'
            || c == '\\'
            || c.is_control()
            || c.is_whitespace()
            || matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|');
        if replace || c == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(c);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == ' ' || c == '.' || c == '_');

    if trimmed.len() > NAME_MAX {
        let mut take = NAME_MAX;
        while take > 0 && !trimmed.is_char_boundary(take) {
            take -= 1;
        }
        trimmed[..take].to_string()
    } else {
        trimmed.to_string()
    }
}
