//! Request principal supplied by the auth collaborator.
//!
//! # Responsibility
//! - Carry `tenant_id`, `user_id` and the granted permission set.
//! - Gate service operations on permissions and tenant ownership.
//!
//! # Invariants
//! - Tenant and user ids are trimmed and non-empty.
//! - The core trusts the supplied values; it never validates tokens.

use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Permission granted to a request principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    TaxonomyRead,
    TaxonomyWrite,
    ClassificationWrite,
    NamespaceAdmin,
}

/// Wire value for read access to namespaces, taxonomies, categories and search.
pub const PERMISSION_TAXONOMY_READ: &str = "taxonomy:read";
/// Wire value for taxonomy and category mutations.
pub const PERMISSION_TAXONOMY_WRITE: &str = "taxonomy:write";
/// Wire value for classification mutations.
pub const PERMISSION_CLASSIFICATION_WRITE: &str = "classification:write";
/// Wire value for namespace administration; implies every other permission.
pub const PERMISSION_NAMESPACE_ADMIN: &str = "namespace:admin";

impl Permission {
    pub const ALL: [Permission; 4] = [
        Permission::TaxonomyRead,
        Permission::TaxonomyWrite,
        Permission::ClassificationWrite,
        Permission::NamespaceAdmin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaxonomyRead => PERMISSION_TAXONOMY_READ,
            Self::TaxonomyWrite => PERMISSION_TAXONOMY_WRITE,
            Self::ClassificationWrite => PERMISSION_CLASSIFICATION_WRITE,
            Self::NamespaceAdmin => PERMISSION_NAMESPACE_ADMIN,
        }
    }
}

/// Parses one permission from its wire value.
pub fn parse_permission(value: &str) -> Result<Permission, ContextError> {
    match value.trim() {
        "" => Err(ContextError::EmptyPermission),
        PERMISSION_TAXONOMY_READ => Ok(Permission::TaxonomyRead),
        PERMISSION_TAXONOMY_WRITE => Ok(Permission::TaxonomyWrite),
        PERMISSION_CLASSIFICATION_WRITE => Ok(Permission::ClassificationWrite),
        PERMISSION_NAMESPACE_ADMIN => Ok(Permission::NamespaceAdmin),
        other => Err(ContextError::UnsupportedPermission(other.to_string())),
    }
}

/// Parses a comma or whitespace separated permission list.
pub fn parse_permission_list(value: &str) -> Result<BTreeSet<Permission>, ContextError> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|item| !item.trim().is_empty())
        .map(parse_permission)
        .collect()
}

/// Errors building a request context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    MissingTenant,
    MissingUser,
    EmptyPermission,
    UnsupportedPermission(String),
}

impl Display for ContextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTenant => write!(f, "tenant id must not be empty"),
            Self::MissingUser => write!(f, "user id must not be empty"),
            Self::EmptyPermission => write!(f, "permission value must not be empty"),
            Self::UnsupportedPermission(value) => write!(f, "permission is unsupported: {value}"),
        }
    }
}

impl Error for ContextError {}

/// Access check failures raised by services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    MissingPermission(Permission),
    CrossTenant { owner_tenant: String },
}

impl Display for AccessError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingPermission(permission) => {
                write!(f, "missing permission `{}`", permission.as_str())
            }
            // Owner tenant is deliberately not echoed to the caller.
            Self::CrossTenant { .. } => write!(f, "record belongs to another tenant"),
        }
    }
}

impl Error for AccessError {}

/// Principal of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    tenant_id: String,
    user_id: String,
    permissions: BTreeSet<Permission>,
}

impl RequestContext {
    pub fn new(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Result<Self, ContextError> {
        let tenant_id = tenant_id.into().trim().to_string();
        if tenant_id.is_empty() {
            return Err(ContextError::MissingTenant);
        }
        let user_id = user_id.into().trim().to_string();
        if user_id.is_empty() {
            return Err(ContextError::MissingUser);
        }
        Ok(Self {
            tenant_id,
            user_id,
            permissions: permissions.into_iter().collect(),
        })
    }

    /// Context holding every permission; used by trusted tooling.
    pub fn admin(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Result<Self, ContextError> {
        Self::new(tenant_id, user_id, Permission::ALL)
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn permissions(&self) -> &BTreeSet<Permission> {
        &self.permissions
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
            || self.permissions.contains(&Permission::NamespaceAdmin)
    }

    pub fn require(&self, permission: Permission) -> Result<(), AccessError> {
        if self.has(permission) {
            Ok(())
        } else {
            Err(AccessError::MissingPermission(permission))
        }
    }

    /// Rejects access to a record owned by a different tenant.
    pub fn ensure_tenant(&self, owner_tenant: &str) -> Result<(), AccessError> {
        if owner_tenant == self.tenant_id {
            Ok(())
        } else {
            Err(AccessError::CrossTenant {
                owner_tenant: owner_tenant.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        parse_permission, parse_permission_list, AccessError, ContextError, Permission,
        RequestContext,
    };

    #[test]
    fn parses_every_permission_wire_value() {
        for permission in Permission::ALL {
            assert_eq!(parse_permission(permission.as_str()), Ok(permission));
        }
    }

    #[test]
    fn rejects_unknown_permission() {
        assert_eq!(
            parse_permission("taxonomy:delete"),
            Err(ContextError::UnsupportedPermission(
                "taxonomy:delete".to_string()
            ))
        );
    }

    #[test]
    fn parses_mixed_separators() {
        let parsed = parse_permission_list("taxonomy:read, classification:write  taxonomy:write")
            .expect("list should parse");
        assert_eq!(parsed.len(), 3);
        assert!(parsed.contains(&Permission::ClassificationWrite));
    }

    #[test]
    fn blank_tenant_is_rejected() {
        let err = RequestContext::new("  ", "u1", []).unwrap_err();
        assert_eq!(err, ContextError::MissingTenant);
    }

    #[test]
    fn namespace_admin_implies_other_permissions() {
        let ctx = RequestContext::new("t1", "u1", [Permission::NamespaceAdmin]).unwrap();
        assert!(ctx.require(Permission::ClassificationWrite).is_ok());
    }

    #[test]
    fn read_only_context_cannot_write() {
        let ctx = RequestContext::new("t1", "u1", [Permission::TaxonomyRead]).unwrap();
        assert_eq!(
            ctx.require(Permission::TaxonomyWrite),
            Err(AccessError::MissingPermission(Permission::TaxonomyWrite))
        );
    }

    #[test]
    fn cross_tenant_access_is_rejected() {
        let ctx = RequestContext::admin("t1", "u1").unwrap();
        assert!(ctx.ensure_tenant("t1").is_ok());
        assert!(matches!(
            ctx.ensure_tenant("t2"),
            Err(AccessError::CrossTenant { .. })
        ));
    }
}
