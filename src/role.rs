use std::fmt;
use std::str::FromStr;

use crate::arn::{Arn, ArnError};
use crate::settings::AccountLookup;

const PRINCIPAL_MARKER: &str = ":saml-provider";
const ROLE_MARKER: &str = ":role";
const ROLE_RESOURCE_PREFIX: &str = "role";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid role binding {value:?}: {reason}")]
pub struct RoleError {
    pub value: String,
    pub reason: String,
}

impl RoleError {
    fn new(value: &str, reason: impl Into<String>) -> Self {
        Self {
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// A role the identity provider allows the user to assume, together with the
/// SAML provider that vouches for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoleBinding {
    pub principal_arn: String,
    pub role_arn: String,
}

impl RoleBinding {
    pub fn new(principal_arn: String, role_arn: String) -> Self {
        Self {
            principal_arn,
            role_arn,
        }
    }

    pub fn account(&self) -> Result<String, ArnError> {
        Ok(Arn::parse(&self.role_arn)?.account)
    }

    /// The local profile name for this role.
    ///
    /// `arn:aws:iam::111111111111:role/Admin` becomes `111111111111/Admin`,
    /// or `prod/Admin` when account `111111111111` has the alias `prod`.
    pub fn profile_name<L>(&self, accounts: &L) -> Result<String, ArnError>
    where
        L: AccountLookup + ?Sized,
    {
        let arn = Arn::parse(&self.role_arn)?;
        let role_name = arn
            .resource
            .strip_prefix(ROLE_RESOURCE_PREFIX)
            .unwrap_or(&arn.resource);

        let alias = accounts
            .account(&arn.account)
            .and_then(|account| account.alias.as_deref())
            .filter(|alias| !alias.is_empty());

        Ok(match alias {
            Some(alias) => format!("{alias}{role_name}"),
            None => {
                log::warn!("No alias mapped for account: {}", arn.account);
                format!("{}{role_name}", arn.account)
            }
        })
    }
}

impl FromStr for RoleBinding {
    type Err = RoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = s.split(',').map(str::trim).collect::<Vec<_>>();
        if tokens.len() != 2 {
            return Err(RoleError::new(s, format!("expected 2 tokens, found {}", tokens.len())));
        }

        let mut principals = Vec::new();
        let mut roles = Vec::new();
        for token in tokens {
            if token.contains(PRINCIPAL_MARKER) {
                principals.push(token);
            } else if token.contains(ROLE_MARKER) {
                roles.push(token);
            }
        }

        match (principals.as_slice(), roles.as_slice()) {
            ([principal], [role]) => Ok(Self::new(principal.to_string(), role.to_string())),
            ([], _) => Err(RoleError::new(s, "unable to locate the principal ARN")),
            (_, []) => Err(RoleError::new(s, "unable to locate the role ARN")),
            _ => Err(RoleError::new(s, "ambiguous principal and role ARNs")),
        }
    }
}

impl fmt::Display for RoleBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.role_arn, self.principal_arn)
    }
}

/// Parses every raw role attribute value.
///
/// The first malformed value fails the whole batch.
pub fn parse_role_bindings<S: AsRef<str>>(values: &[S]) -> Result<Vec<RoleBinding>, RoleError> {
    values.iter().map(|value| value.as_ref().parse()).collect()
}
