use crate::contact::Contact;

/// Normalize a string for search indexing and querying.
pub fn normalize(s: &str) -> String {
    s.to_lowercase()
}

/// Trimmed, lowercased search term; blank input means "no filter".
pub fn normalize_query(query: &str) -> Option<String> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(normalize(trimmed))
    }
}

/// LIKE pattern for a normalized needle, to be used with `ESCAPE '\'`.
pub fn like_pattern(normalized: &str) -> String {
    let escaped = normalized
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Contacts from `all` matching `term`, in their original order.
pub fn filter_contacts(all: &[Contact], term: &str) -> Vec<Contact> {
    if term.is_empty() {
        return all.to_vec();
    }
    all.iter().filter(|c| c.matches(term)).cloned().collect()
}
