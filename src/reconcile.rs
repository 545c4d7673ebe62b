//! Brings the managed profiles in line with the roles the user holds.
//!
//! One pass deletes managed profiles whose role is gone, then walks the
//! authorized roles and refreshes every profile that is missing, expired or
//! force-refreshed. A refreshed profile is deleted and written again from
//! scratch so no key from an earlier shape survives.

use std::collections::BTreeMap;

use chrono::SecondsFormat;

use crate::arn::ArnError;
use crate::aws::{Credentials, RoleAssumer};
use crate::profiles::{
    ProfileError, ProfileStore, ACCESS_KEY_ID_KEY, EXPIRATION_KEY, MANAGED_KEY,
    SECRET_ACCESS_KEY_KEY, SESSION_TOKEN_KEY,
};
use crate::role::RoleBinding;
use crate::saml::SAMLAssertion;
use crate::settings::AccountLookup;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("unable to resolve a profile name")]
    Arn(#[from] ArnError),

    #[error(transparent)]
    Store(#[from] ProfileError),
}

#[derive(Debug)]
pub struct RefreshFailure {
    pub profile: String,
    pub role_arn: String,
    pub error: anyhow::Error,
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub refreshed: Vec<String>,
    pub unchanged: Vec<String>,
    pub deleted: Vec<String>,
    /// Desired names already taken by a profile this tool does not manage.
    pub skipped: Vec<String>,
    pub failed: Vec<RefreshFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProfileState {
    Absent,
    Valid,
    Expired,
    Unmanaged,
}

pub struct Reconciler<'a, A, L: ?Sized> {
    pub store: &'a ProfileStore,
    pub role_assumer: &'a A,
    pub accounts: &'a L,
    pub force_refresh: bool,
}

impl<A, L> Reconciler<'_, A, L>
where
    A: RoleAssumer,
    L: AccountLookup + ?Sized,
{
    pub async fn reconcile(
        &self,
        roles: &[RoleBinding],
        assertion: &SAMLAssertion,
    ) -> Result<ReconcileReport, ReconcileError> {
        let desired = desired_profiles(roles, self.accounts)?;
        let mut report = ReconcileReport::default();

        for name in self.store.list_managed_names()? {
            if !desired.contains_key(&name) {
                log::info!("Deleting profile ({name}) as it doesn't map to a valid role");
                self.store.delete(&name)?;
                report.deleted.push(name);
            }
        }

        for (name, role) in desired {
            let state = self.profile_state(&name);

            if state == ProfileState::Unmanaged {
                log::warn!(
                    "Profile {name} exists but is not managed by rolesync, leaving it alone"
                );
                report.skipped.push(name);
                continue;
            }

            if !self.force_refresh && state == ProfileState::Valid {
                log::debug!("Skipping non-expired profile: {name}");
                report.unchanged.push(name);
                continue;
            }

            log::debug!("Refreshing profile: {name}");
            if state != ProfileState::Absent {
                self.store.delete(&name)?;
            }

            match self.role_assumer.assume_role(role, assertion).await {
                Ok(credentials) => {
                    self.write_profile(&name, role, &credentials)?;
                    log::info!("Fresh token retrieved for: {name}");
                    report.refreshed.push(name);
                }
                Err(error) => {
                    log::error!(
                        "Error assuming ({}) with principal ({}): {error:#}",
                        role.role_arn,
                        role.principal_arn
                    );
                    report.failed.push(RefreshFailure {
                        profile: name,
                        role_arn: role.role_arn.clone(),
                        error,
                    });
                }
            }
        }

        Ok(report)
    }

    /// Lookup failures count as expired so the profile gets rebuilt.
    fn profile_state(&self, name: &str) -> ProfileState {
        match self.store.exists(name) {
            Ok(false) => ProfileState::Absent,
            Ok(true) => match self.store.is_expired(name) {
                Ok(false) => ProfileState::Valid,
                Ok(true) => ProfileState::Expired,
                Err(ProfileError::NotManaged(_)) => ProfileState::Unmanaged,
                Err(e) => {
                    log::warn!("{e}, treating profile as expired");
                    ProfileState::Expired
                }
            },
            Err(e) => {
                log::warn!("Unable to check for profile {name}: {e}, treating it as expired");
                ProfileState::Expired
            }
        }
    }

    fn write_profile(
        &self,
        name: &str,
        role: &RoleBinding,
        credentials: &Credentials,
    ) -> Result<(), ReconcileError> {
        let expiration = credentials.expiration.to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut entries = vec![
            (ACCESS_KEY_ID_KEY, credentials.access_key_id.as_str()),
            (SECRET_ACCESS_KEY_KEY, credentials.secret_access_key.as_str()),
            (SESSION_TOKEN_KEY, credentials.session_token.as_str()),
            (EXPIRATION_KEY, expiration.as_str()),
            (MANAGED_KEY, "true"),
        ];

        let account_id = role.account()?;
        if let Some(account) = self.accounts.account(&account_id) {
            for (key, value) in &account.keys {
                log::debug!("Adding configured key {key} to profile {name}");
                entries.push((key.as_str(), value.as_str()));
            }
        }

        self.store.create(name)?;
        self.store.set_keys(name, entries)?;

        Ok(())
    }
}

/// Maps every role to its profile name. When two roles land on the same name
/// the later one wins.
pub fn desired_profiles<'r, L: AccountLookup + ?Sized>(
    roles: &'r [RoleBinding],
    accounts: &L,
) -> Result<BTreeMap<String, &'r RoleBinding>, ArnError> {
    let mut desired = BTreeMap::new();

    for role in roles {
        let name = role.profile_name(accounts)?;
        log::debug!("Role {role} maps to profile {name}");

        if let Some(previous) = desired.insert(name.clone(), role) {
            log::warn!(
                "Roles {} and {} both map to profile {name}, using {}",
                previous.role_arn,
                role.role_arn,
                role.role_arn
            );
        }
    }

    Ok(desired)
}
