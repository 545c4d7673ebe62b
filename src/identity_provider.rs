use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::io::AsyncReadExt;

use crate::saml::SAMLAssertion;

#[allow(async_fn_in_trait)]
pub trait IdentityProvider {
    async fn get_saml_assertion(&self) -> anyhow::Result<SAMLAssertion>;
}

/// A base64 SAMLResponse captured elsewhere, read from a file or from stdin
/// when the path is `-`.
pub struct AssertionFile {
    pub path: PathBuf,
}

impl IdentityProvider for AssertionFile {
    async fn get_saml_assertion(&self) -> anyhow::Result<SAMLAssertion> {
        let encoded = if self.path == Path::new("-") {
            log::debug!("Reading SAML assertion from stdin");
            let mut encoded = String::new();
            tokio::io::stdin()
                .read_to_string(&mut encoded)
                .await
                .context("Unable to read SAML assertion from stdin")?;
            encoded
        } else {
            log::debug!("Reading SAML assertion from {}", self.path.display());
            tokio::fs::read_to_string(&self.path)
                .await
                .with_context(|| {
                    format!("Unable to read SAML assertion from {}", self.path.display())
                })?
        };

        SAMLAssertion::from_base64(&encoded).context("Unable to decode SAML assertion")
    }
}
