//! Rule text derived from a definition's description.

/// Normalize line endings to `\n` and trim trailing whitespace on each line.
pub fn recommendation(description: &str) -> String {
    description
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// First non-empty line of the description, or `fallback`.
pub fn synopsis(description: &str, fallback: &str) -> String {
    recommendation(description)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or(fallback)
        .to_string()
}
