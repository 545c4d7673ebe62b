use anyhow::{anyhow, Context};
use scraper::{Html, Selector};

use crate::identity_provider::IdentityProvider;
use crate::saml::SAMLAssertion;
use crate::settings::IdpSettings;
use crate::ui::UI;

/// Signs in to an identity provider that takes a plain HTML form post and
/// answers with the auto-submitting SAMLResponse page.
pub struct FormLogin<'a> {
    pub ui: &'a dyn UI,
    pub http_client: &'a reqwest::Client,
    pub settings: &'a IdpSettings,
}

impl FormLogin<'_> {
    fn username(&self) -> anyhow::Result<String> {
        match &self.settings.username {
            Some(username) if !username.trim().is_empty() => {
                log::info!("Using configured username");
                Ok(username.trim().to_string())
            }
            _ => self.ui.get_username(),
        }
    }
}

impl IdentityProvider for FormLogin<'_> {
    async fn get_saml_assertion(&self) -> anyhow::Result<SAMLAssertion> {
        let username = self.username()?;
        let password = self.ui.get_password()?;
        let target = self.settings.target_url.as_deref().unwrap_or_default();

        let url = self.settings.authentication_url.clone();
        log::debug!("Posting credentials to the IdP: {url}");

        let response = self
            .http_client
            .post(url)
            .form(&[
                ("username", username.as_str()),
                ("password", password.as_str()),
                ("TARGET", target),
            ])
            .send()
            .await
            .context("Error posting to IdP")?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            self.ui.error(&format!(
                "Authentication failed! (status_code: {})",
                status.as_u16()
            ));
            return Err(anyhow!("IdP answered with {status}"));
        }

        let encoded = get_base64_saml_assertion(&body)?
            .context("Unable to locate SAMLResponse, check your username and password")?;

        SAMLAssertion::from_base64(&encoded).context("Unable to decode SAML assertion")
    }
}

/// Pulls the value of the `SAMLResponse` form field out of an HTML page.
fn get_base64_saml_assertion(html: &str) -> anyhow::Result<Option<String>> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"input[name="SAMLResponse"]"#)
        .map_err(|e| anyhow!("invalid SAMLResponse selector: {e:?}"))?;

    Ok(document
        .select(&selector)
        .next()
        .and_then(|element| element.value().attr("value"))
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_saml_response_field() {
        let html = r#"
            <html><body onload="document.forms[0].submit()">
              <form method="post" action="https://signin.aws.amazon.com/saml">
                <input type="hidden" name="RelayState" value="">
                <input type="hidden" name="SAMLResponse" value="PHNhbWxwOlJlc3BvbnNlLz4=">
              </form>
            </body></html>"#;

        assert_eq!(
            get_base64_saml_assertion(html).unwrap().as_deref(),
            Some("PHNhbWxwOlJlc3BvbnNlLz4=")
        );
    }

    #[test]
    fn login_page_has_no_saml_response() {
        let html = r#"<form><input name="username"><input name="password" type="password"></form>"#;

        assert_eq!(get_base64_saml_assertion(html).unwrap(), None);
    }
}
