//! Text rendering utilities for human-friendly error messages.
//!
//! Provides helpers to format resolution chains, shorten type names,
//! and score "did you mean?" suggestions in error output.

/// Renders a resolution chain as a readable string.
///
/// # Examples
/// ```
/// use mawsil_support::rendering::join_chain;
///
/// let chain = vec!["UserService", "UserRepo", "Database", "UserService"];
/// assert_eq!(join_chain(&chain), "UserService → UserRepo → Database → UserService");
/// ```
pub fn join_chain<S: AsRef<str>>(chain: &[S]) -> String {
    chain
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(" → ")
}

/// Shortens a fully qualified type name for display.
///
/// ```
/// use mawsil_support::rendering::short_type_name;
///
/// assert_eq!(short_type_name("my_app::services::user::UserService"), "UserService");
/// assert_eq!(
///     short_type_name("alloc::sync::Arc<dyn my_app::traits::Logger>"),
///     "Arc<dyn Logger>"
/// );
/// ```
pub fn short_type_name(full_name: &str) -> String {
    // Split at generic/tuple punctuation, then keep only the last `::`
    // segment of each path token in between.
    let mut out = String::with_capacity(full_name.len());
    let mut token_start = 0;

    for (idx, ch) in full_name.char_indices() {
        if matches!(ch, '<' | '>' | ',' | ' ' | '&' | '(' | ')' | '[' | ']' | ';') {
            out.push_str(last_path_segment(&full_name[token_start..idx]));
            out.push(ch);
            token_start = idx + ch.len_utf8();
        }
    }

    out.push_str(last_path_segment(&full_name[token_start..]));
    out
}

fn last_path_segment(token: &str) -> &str {
    token.rsplit("::").next().unwrap_or(token)
}

/// Quick "close enough" heuristic for suggestion scoring.
///
/// Not a full edit distance — substring containment, or a rough
/// positional character overlap of at least 60%.
pub fn is_similar(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();

    if a.contains(&b) || b.contains(&a) {
        return true;
    }

    if a.len().abs_diff(b.len()) > 3 {
        return false;
    }

    let common = a.chars().zip(b.chars()).filter(|(ca, cb)| ca == cb).count();
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return true;
    }

    common * 100 / max_len >= 60
}
