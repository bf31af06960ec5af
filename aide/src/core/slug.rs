//! Directory names for `--new` projects.

const MAX_SLUG_LEN: usize = 50;

/// Derive a directory name from a free-text request.
///
/// Lowercases, collapses every run of non-alphanumeric characters into a single
/// `-`, trims dashes at both ends and truncates to 50 characters.
pub fn project_slug(request: &str) -> String {
    let mut slug = String::with_capacity(request.len());
    let mut pending_dash = false;
    for ch in request.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
    }

    let truncated: String = slug.chars().take(MAX_SLUG_LEN).collect();
    let trimmed = truncated.trim_end_matches('-');
    if trimmed.is_empty() {
        "project".to_string()
    } else {
        trimmed.to_string()
    }
}
