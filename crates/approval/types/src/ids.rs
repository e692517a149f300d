//! Identifiers used across the approval layer

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Tenant boundary. Nothing crosses it.
    TenantId
);
string_id!(
    /// Identifier of a validation produced by the validation pipeline
    ValidationId
);
string_id!(
    /// A user known to the identity boundary
    UserId
);
string_id!(
    /// A role known to the identity boundary
    RoleId
);
string_id!(
    /// One version of a workflow template
    TemplateId
);
string_id!(
    /// One approval instance
    InstanceId
);

impl TemplateId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl InstanceId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

/// Ordinal rank in the approval hierarchy. Higher means more authority.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Level(pub u32);

impl Level {
    pub fn new(level: u32) -> Self {
        Self(level)
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Who performed an action on an approval
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub name: String,
    /// Roles the identity boundary reports for this user
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<RoleId>,
    /// Tenant the identity boundary authenticated this user for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            name: name.into(),
            roles: Vec::new(),
            tenant_id: None,
        }
    }

    /// The background process acting on behalf of the engine
    pub fn system(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id: UserId::new(id),
            roles: Vec::new(),
            tenant_id: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(RoleId::new(role));
        self
    }

    pub fn in_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant_id = Some(TenantId::new(tenant));
        self
    }

    pub fn has_role(&self, role: &RoleId) -> bool {
        self.roles.contains(role)
    }

    /// Whether this actor may act inside `tenant`. Actors the identity
    /// boundary did not bind to a tenant are scoped by the directory alone.
    pub fn belongs_to(&self, tenant: &TenantId) -> bool {
        self.tenant_id.as_ref().map_or(true, |t| t == tenant)
    }
}
