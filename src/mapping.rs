//! Permission mapping tables and principal parsing
//!
//! BigQuery exposes three historically inconsistent authorization surfaces:
//! the legacy dataset ACL (OWNER/WRITER/READER), project IAM bindings
//! (`roles/...`), and the synthetic "special group" ACL entities
//! (`projectOwners` etc.) whose membership is only derivable through the
//! project's own IAM bindings. This module owns the normalization of all
//! three into one entitlement vocabulary.
//!
//! The tables are frozen at construction and injectable ([`RoleCatalog`]),
//! so tests can substitute alternate mappings. All lookups are pure.

use std::collections::HashMap;

/// Entitlement slug for legacy dataset ownership
pub const OWNER_ENTITLEMENT: &str = "owner";
/// Entitlement slug for legacy dataset write access
pub const WRITER_ENTITLEMENT: &str = "writer";
/// Entitlement slug for legacy dataset read access
pub const VIEWER_ENTITLEMENT: &str = "viewer";

/// Entitlement slug for project membership
pub const MEMBER_ENTITLEMENT: &str = "member";
/// Entitlement slug for role assignment
pub const ASSIGNED_ENTITLEMENT: &str = "assigned";

/// Legacy ACL roles as returned by the dataset metadata API. The API accepts
/// IAM role names on write but only ever returns these.
pub const LEGACY_OWNER: &str = "OWNER";
pub const LEGACY_WRITER: &str = "WRITER";
pub const LEGACY_READER: &str = "READER";

/// Legacy entitlements grantable on every dataset
pub const DATASET_ENTITLEMENTS: &[&str] =
    &[OWNER_ENTITLEMENT, WRITER_ENTITLEMENT, VIEWER_ENTITLEMENT];

/// IAM-derived entitlements grantable on every dataset, in display order
pub const DATASET_IAM_ENTITLEMENTS: &[&str] = &[
    "roles/bigquery.admin",
    "roles/bigquery.studioAdmin",
    "roles/bigquery.user",
    "roles/bigquery.resourceEditor",
    "roles/bigquery.metadataViewer",
    "roles/bigquery.filteredDataViewer",
    "roles/admin",
    "roles/editor",
    "roles/reader",
];

/// A principal reference as it appears in IAM binding member strings.
///
/// `group:` and `domain:` members exist upstream but are deliberately
/// unhandled; they parse as [`PrincipalRef::Unrecognized`] and callers skip
/// them with a log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrincipalRef {
    User(String),
    ServiceAccount(String),
    Unrecognized(String),
}

impl PrincipalRef {
    /// Parse an IAM member string such as `user:alice@example.com` or
    /// `serviceAccount:svc@proj.iam.gserviceaccount.com`.
    pub fn parse(member: &str) -> Self {
        if let Some(email) = member.strip_prefix("user:") {
            PrincipalRef::User(email.to_string())
        } else if let Some(email) = member.strip_prefix("serviceAccount:") {
            PrincipalRef::ServiceAccount(email.to_string())
        } else {
            PrincipalRef::Unrecognized(member.to_string())
        }
    }

    /// The bare email, when the principal kind is recognized
    pub fn email(&self) -> Option<&str> {
        match self {
            PrincipalRef::User(email) | PrincipalRef::ServiceAccount(email) => Some(email),
            PrincipalRef::Unrecognized(_) => None,
        }
    }
}

/// Frozen lookup tables for role and group normalization
#[derive(Debug, Clone)]
pub struct RoleCatalog {
    legacy_to_entitlement: HashMap<String, String>,
    iam_to_entitlement: HashMap<String, String>,
    special_group_to_role: HashMap<String, String>,
}

impl Default for RoleCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RoleCatalog {
    /// The canonical production tables.
    ///
    /// Legacy mapping is OWNER/WRITER/READER to owner/writer/viewer; note
    /// the non-symmetric READER->viewer naming, which follows the IAM-side
    /// vocabulary rather than the legacy one. IAM roles with dataset-level
    /// read or write reach map to entitlements named after themselves.
    pub fn builtin() -> Self {
        let legacy = [
            (LEGACY_OWNER, OWNER_ENTITLEMENT),
            (LEGACY_WRITER, WRITER_ENTITLEMENT),
            (LEGACY_READER, VIEWER_ENTITLEMENT),
        ];

        // roles/bigquery.resourceEditor can read and modify dataset metadata
        // but not the dataset content itself; roles/bigquery.filteredDataViewer
        // only reaches table rows matching its row-access policy.
        let iam = DATASET_IAM_ENTITLEMENTS.iter().map(|r| (*r, *r));

        // The legacy ACL API never exposes these groups' membership; it is
        // approximated through the binding of the corresponding basic role.
        let special_groups = [
            ("projectOwners", "roles/owner"),
            ("projectReaders", "roles/viewer"),
            ("projectWriters", "roles/editor"),
        ];

        Self::new(legacy, iam, special_groups)
    }

    /// Build a catalog from explicit table contents (tests substitute their
    /// own mappings through this)
    pub fn new<'a>(
        legacy: impl IntoIterator<Item = (&'a str, &'a str)>,
        iam: impl IntoIterator<Item = (&'a str, &'a str)>,
        special_groups: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        fn to_map<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> HashMap<String, String> {
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        }

        Self {
            legacy_to_entitlement: to_map(legacy),
            iam_to_entitlement: to_map(iam),
            special_group_to_role: to_map(special_groups),
        }
    }

    /// Map a legacy ACL role (OWNER/WRITER/READER) to its entitlement
    pub fn legacy_role_entitlement(&self, role: &str) -> Option<&str> {
        self.legacy_to_entitlement.get(role).map(String::as_str)
    }

    /// Map a fully-qualified IAM role to its entitlement
    pub fn iam_role_entitlement(&self, role: &str) -> Option<&str> {
        self.iam_to_entitlement.get(role).map(String::as_str)
    }

    /// Resolve a special-group ACL entity to the IAM role whose binding
    /// membership approximates it
    pub fn special_group_role(&self, group: &str) -> Option<&str> {
        self.special_group_to_role.get(group).map(String::as_str)
    }
}

/// Strip the `roles/` prefix for display names. Never used for semantic
/// comparisons.
pub fn strip_role_prefix(role: &str) -> &str {
    role.strip_prefix("roles/").unwrap_or(role)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_mapping_is_total_over_its_domain() {
        let catalog = RoleCatalog::builtin();
        assert_eq!(catalog.legacy_role_entitlement("OWNER"), Some("owner"));
        assert_eq!(catalog.legacy_role_entitlement("WRITER"), Some("writer"));
        assert_eq!(catalog.legacy_role_entitlement("READER"), Some("viewer"));
    }

    #[test]
    fn test_unknown_legacy_role_is_not_found() {
        let catalog = RoleCatalog::builtin();
        assert_eq!(catalog.legacy_role_entitlement("ADMIN"), None);
        assert_eq!(catalog.legacy_role_entitlement(""), None);
        assert_eq!(catalog.legacy_role_entitlement("owner"), None);
    }

    #[test]
    fn test_iam_mapping_covers_the_dataset_roles() {
        let catalog = RoleCatalog::builtin();
        for role in DATASET_IAM_ENTITLEMENTS {
            assert!(catalog.iam_role_entitlement(role).is_some(), "{role}");
        }
        assert_eq!(catalog.iam_role_entitlement("roles/storage.admin"), None);
    }

    #[test]
    fn test_special_group_resolution() {
        let catalog = RoleCatalog::builtin();
        assert_eq!(
            catalog.special_group_role("projectOwners"),
            Some("roles/owner")
        );
        assert_eq!(
            catalog.special_group_role("projectReaders"),
            Some("roles/viewer")
        );
        assert_eq!(
            catalog.special_group_role("projectWriters"),
            Some("roles/editor")
        );
        assert_eq!(catalog.special_group_role("allAuthenticatedUsers"), None);
    }

    #[test]
    fn test_principal_parse_is_prefix_exclusive() {
        assert_eq!(
            PrincipalRef::parse("user:alice@example.com"),
            PrincipalRef::User("alice@example.com".to_string())
        );
        assert_eq!(
            PrincipalRef::parse("serviceAccount:svc@p.iam.gserviceaccount.com"),
            PrincipalRef::ServiceAccount("svc@p.iam.gserviceaccount.com".to_string())
        );
        assert_eq!(
            PrincipalRef::parse("group:eng@example.com"),
            PrincipalRef::Unrecognized("group:eng@example.com".to_string())
        );
        assert_eq!(
            PrincipalRef::parse("domain:example.com"),
            PrincipalRef::Unrecognized("domain:example.com".to_string())
        );
        assert_eq!(PrincipalRef::parse("user:").email(), Some(""));
        assert_eq!(PrincipalRef::parse("alice@example.com").email(), None);
    }

    #[test]
    fn test_strip_role_prefix_is_display_only() {
        assert_eq!(strip_role_prefix("roles/bigquery.admin"), "bigquery.admin");
        assert_eq!(strip_role_prefix("custom.role"), "custom.role");
        assert_eq!(strip_role_prefix("roles/"), "");
    }

    #[test]
    fn test_catalog_tables_are_injectable() {
        let catalog = RoleCatalog::new(
            [("READER", "writer")],
            [],
            [("projectReaders", "roles/custom")],
        );
        assert_eq!(catalog.legacy_role_entitlement("READER"), Some("writer"));
        assert_eq!(catalog.legacy_role_entitlement("OWNER"), None);
        assert_eq!(
            catalog.special_group_role("projectReaders"),
            Some("roles/custom")
        );
    }
}
