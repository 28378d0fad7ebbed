//! Display-name composition for contacts whose provider identity arrives as
//! separate first/last/username fields rather than one display string.

/// Prefers "First Last", falls back to whichever of first/last is present,
/// then to a `@username`, then to `None` if nothing usable was supplied.
pub fn name_from_first_last_username(
    first: Option<&str>,
    last: Option<&str>,
    username: Option<&str>,
) -> Option<String> {
    let first = first.map(str::trim).filter(|s| !s.is_empty());
    let last = last.map(str::trim).filter(|s| !s.is_empty());

    match (first, last) {
        (Some(f), Some(l)) => Some(format!("{f} {l}")),
        (Some(f), None) => Some(f.to_string()),
        (None, Some(l)) => Some(l.to_string()),
        (None, None) => username
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|u| format!("@{u}")),
    }
}
