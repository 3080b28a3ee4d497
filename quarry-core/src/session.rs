//! Research session identifiers.
//!
//! Ids are date-prefixed so a plain sort lists sessions chronologically:
//! `2026-10-16-1a2b3c4d`. A follow-up session derives its id from the root of
//! its chain: `2026-10-16-1a2b3c4d-v2`, `-v3`, and so on.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new root session id for the given instant.
pub fn new_session_id(now: DateTime<Utc>) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.format("%Y-%m-%d"), &uuid[..8])
}

/// Split an id into its chain root and version number (1 for roots).
pub fn parse_version(session_id: &str) -> (&str, u32) {
    if let Some((root, suffix)) = session_id.rsplit_once("-v")
        && let Ok(version) = suffix.parse::<u32>()
        && version >= 2
    {
        return (root, version);
    }
    (session_id, 1)
}

/// Id for the next follow-up of `parent_id`, given every existing id.
pub fn next_version_id(parent_id: &str, existing: &[String]) -> String {
    let (root, parent_version) = parse_version(parent_id);
    let highest = existing
        .iter()
        .map(|id| parse_version(id))
        .filter(|(r, _)| *r == root)
        .map(|(_, v)| v)
        .max()
        .unwrap_or(1)
        .max(parent_version);
    format!("{}-v{}", root, highest + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_session_id_format() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 9, 30, 0).unwrap();
        let id = new_session_id(now);
        assert!(id.starts_with("2026-10-16-"));
        assert_eq!(id.len(), "2026-10-16-".len() + 8);
        assert!(id[11..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("2026-10-16-abcd1234"), ("2026-10-16-abcd1234", 1));
        assert_eq!(parse_version("2026-10-16-abcd1234-v3"), ("2026-10-16-abcd1234", 3));
        // a hex suffix that merely looks like a version is not one
        assert_eq!(parse_version("2026-10-16-ab-vx"), ("2026-10-16-ab-vx", 1));
    }

    #[test]
    fn test_next_version_id() {
        let root = "2026-10-16-abcd1234".to_string();
        assert_eq!(next_version_id(&root, &[root.clone()]), "2026-10-16-abcd1234-v2");

        let existing = vec![
            root.clone(),
            "2026-10-16-abcd1234-v2".to_string(),
            "2026-10-16-abcd1234-v3".to_string(),
            "2026-10-16-ffff0000-v9".to_string(),
        ];
        // following up an older version still allocates after the newest
        assert_eq!(
            next_version_id("2026-10-16-abcd1234-v2", &existing),
            "2026-10-16-abcd1234-v4"
        );
    }
}
