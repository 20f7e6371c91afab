use axum::http::Method;
use serde_json::{json, Value as JsonValue};
use std::fmt;

use crate::config::Config;

/// Permission scope of the identity storage calls are made under
///
/// A scope is attached to a route, never to a request: every request through
/// a route shares the same trust level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionScope {
    Read,
    ReadWrite,
}

impl PermissionScope {
    /// Whether a storage call with the given method may run under this scope
    pub fn permits(self, method: &Method) -> bool {
        match self {
            PermissionScope::Read => *method == Method::GET,
            PermissionScope::ReadWrite => *method == Method::GET || *method == Method::PUT,
        }
    }

    pub fn actions(self) -> &'static [&'static str] {
        match self {
            PermissionScope::Read => &["s3:GetObject"],
            PermissionScope::ReadWrite => &["s3:GetObject", "s3:PutObject"],
        }
    }

    /// IAM session policy that narrows an assumed role to exactly this scope
    /// on the objects of `bucket`.
    pub fn session_policy(self, bucket: &str) -> JsonValue {
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Action": self.actions(),
                "Resource": [format!("arn:aws:s3:::{}/*", bucket)],
            }]
        })
    }
}

impl fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionScope::Read => write!(f, "read"),
            PermissionScope::ReadWrite => write!(f, "read-write"),
        }
    }
}

/// The fixed identity storage calls for one scope execute under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegatedIdentity {
    /// Role to assume. `None` means the ambient credential chain is used as-is.
    pub role_arn: Option<String>,
    pub session_name: String,
    pub scope: PermissionScope,
}

impl DelegatedIdentity {
    pub fn for_scope(config: &Config, scope: PermissionScope) -> Self {
        Self {
            role_arn: config.delegated_role_arn.clone(),
            session_name: format!("{}-{}", config.role_session_name, scope),
            scope,
        }
    }
}
