use std::fmt;

use anyhow::Context;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_sts::config::Region;
use chrono::{DateTime, Utc};

use crate::role::RoleBinding;
use crate::saml::SAMLAssertion;

const FALLBACK_REGION: &str = "us-east-1";

/// Temporary credentials for one assumed role.
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &"** redacted **")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Exchanges a role binding and the assertion that grants it for credentials.
#[allow(async_fn_in_trait)]
pub trait RoleAssumer {
    async fn assume_role(
        &self,
        role: &RoleBinding,
        assertion: &SAMLAssertion,
    ) -> anyhow::Result<Credentials>;
}

pub struct StsRoleAssumer {
    client: aws_sdk_sts::Client,
}

impl StsRoleAssumer {
    /// AssumeRoleWithSAML is an unsigned call, so no ambient credentials are
    /// loaded.
    pub async fn new(region: Option<String>) -> Self {
        let region = RegionProviderChain::first_try(region.map(Region::new))
            .or_default_provider()
            .or_else(Region::new(FALLBACK_REGION));

        let config = aws_config::defaults(BehaviorVersion::latest())
            .no_credentials()
            .region(region)
            .load()
            .await;

        Self {
            client: aws_sdk_sts::Client::new(&config),
        }
    }
}

impl RoleAssumer for StsRoleAssumer {
    async fn assume_role(
        &self,
        role: &RoleBinding,
        assertion: &SAMLAssertion,
    ) -> anyhow::Result<Credentials> {
        log::debug!(
            "Assuming ({}) with principal ({})",
            role.role_arn,
            role.principal_arn
        );

        let output = self
            .client
            .assume_role_with_saml()
            .role_arn(&role.role_arn)
            .principal_arn(&role.principal_arn)
            .saml_assertion(assertion.encoded_as_base64())
            .send()
            .await
            .with_context(|| format!("AssumeRoleWithSAML failed for {}", role.role_arn))?;

        let credentials = output
            .credentials()
            .with_context(|| format!("STS returned no credentials for {}", role.role_arn))?;

        let expiration = credentials.expiration();
        let expiration = DateTime::from_timestamp(expiration.secs(), expiration.subsec_nanos())
            .context("STS returned an out of range expiration")?;

        Ok(Credentials {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().to_string(),
            expiration,
        })
    }
}
