use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::role::{parse_role_bindings, RoleBinding, RoleError};

pub const ROLE_ATTRIBUTE_NAME: &str = "https://aws.amazon.com/SAML/Attributes/Role";

const ASSERTION_TAG: &str = "Assertion";
const ATTRIBUTE_STATEMENT_TAG: &str = "AttributeStatement";
const ATTRIBUTE_TAG: &str = "Attribute";
const ATTRIBUTE_VALUE_TAG: &str = "AttributeValue";

#[derive(Debug, thiserror::Error)]
pub enum SamlError {
    #[error("missing {tag} element")]
    MissingElement { tag: &'static str },

    #[error("SAML response is not valid base64")]
    Base64(#[from] base64::DecodeError),

    #[error("SAML response is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("SAML response is not well-formed XML")]
    Xml(#[from] roxmltree::Error),

    #[error(transparent)]
    Role(#[from] RoleError),
}

/// A decoded SAML response as handed back by the identity provider.
pub struct SAMLAssertion {
    pub assertion: String,
}

impl SAMLAssertion {
    pub fn from_base64(encoded: &str) -> Result<Self, SamlError> {
        let decoded = STANDARD.decode(encoded.trim())?;
        let assertion = String::from_utf8(decoded)?;
        Ok(Self { assertion })
    }

    /// STS expects the assertion exactly as the browser would post it.
    pub fn encoded_as_base64(&self) -> String {
        STANDARD.encode(&self.assertion)
    }

    pub fn extract_role_attribute_values(&self) -> Result<Vec<String>, SamlError> {
        extract_role_attribute_values(&self.assertion)
    }

    pub fn extract_roles(&self) -> Result<Vec<RoleBinding>, SamlError> {
        let values = self.extract_role_attribute_values()?;
        Ok(parse_role_bindings(&values)?)
    }
}

/// Collects the text of every role `AttributeValue` in the first assertion.
///
/// Child lookups are restricted to the assertion's own namespace. A document
/// with an attribute statement but no role attribute yields no values.
pub fn extract_role_attribute_values(document: &str) -> Result<Vec<String>, SamlError> {
    let doc = roxmltree::Document::parse(document)?;

    let assertion = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == ASSERTION_TAG)
        .ok_or(SamlError::MissingElement { tag: ASSERTION_TAG })?;
    let namespace = assertion.tag_name().namespace();

    let statement = assertion
        .children()
        .find(|n| is_child(n, ATTRIBUTE_STATEMENT_TAG, namespace))
        .ok_or(SamlError::MissingElement {
            tag: ATTRIBUTE_STATEMENT_TAG,
        })?;

    let values = statement
        .children()
        .filter(|n| is_child(n, ATTRIBUTE_TAG, namespace))
        .filter(|n| n.attribute("Name") == Some(ROLE_ATTRIBUTE_NAME))
        .flat_map(|attribute| {
            attribute
                .children()
                .filter(move |n| is_child(n, ATTRIBUTE_VALUE_TAG, namespace))
        })
        .map(|value| value.text().unwrap_or_default().trim().to_string())
        .collect::<Vec<_>>();

    log::debug!("Found {} role attribute values in assertion", values.len());

    Ok(values)
}

fn is_child(node: &roxmltree::Node, tag: &str, namespace: Option<&str>) -> bool {
    node.is_element() && node.tag_name().name() == tag && node.tag_name().namespace() == namespace
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = include_str!("../tests/fixtures/saml_response.xml");

    #[test]
    fn extracts_role_values_in_document_order() {
        let values = extract_role_attribute_values(RESPONSE).unwrap();

        assert_eq!(
            values,
            vec![
                "arn:aws:iam::111111111111:saml-provider/Idp,\
                 arn:aws:iam::111111111111:role/Admin",
                "arn:aws:iam::111111111111:role/ReadOnly,\
                 arn:aws:iam::111111111111:saml-provider/Idp",
                "arn:aws:iam::222222222222:saml-provider/Idp,\
                 arn:aws:iam::222222222222:role/team/Deployer",
            ]
        );
    }

    #[test]
    fn missing_assertion_is_reported() {
        let document = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"/>"#;

        let err = extract_role_attribute_values(document).unwrap_err();
        assert!(matches!(err, SamlError::MissingElement { tag: "Assertion" }));
        assert_eq!(err.to_string(), "missing Assertion element");
    }

    #[test]
    fn missing_attribute_statement_is_reported() {
        let document = r#"
            <saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion">
                <saml:Subject/>
            </saml:Assertion>"#;

        let err = extract_role_attribute_values(document).unwrap_err();
        assert!(matches!(err, SamlError::MissingElement { tag: "AttributeStatement" }));
    }

    #[test]
    fn statement_without_role_attribute_yields_nothing() {
        let document = r#"
            <saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion">
                <saml:AttributeStatement>
                    <saml:Attribute Name="https://aws.amazon.com/SAML/Attributes/RoleSessionName">
                        <saml:AttributeValue>jdoe</saml:AttributeValue>
                    </saml:Attribute>
                </saml:AttributeStatement>
            </saml:Assertion>"#;

        assert!(extract_role_attribute_values(document).unwrap().is_empty());
    }

    #[test]
    fn elements_from_other_namespaces_are_ignored() {
        let document = r#"
            <saml:Assertion
                xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
                xmlns:x="urn:example">
                <saml:AttributeStatement>
                    <x:Attribute Name="https://aws.amazon.com/SAML/Attributes/Role">
                        <x:AttributeValue>ignored</x:AttributeValue>
                    </x:Attribute>
                    <saml:Attribute Name="https://aws.amazon.com/SAML/Attributes/Role">
                        <x:AttributeValue>ignored</x:AttributeValue>
                        <saml:AttributeValue>kept</saml:AttributeValue>
                    </saml:Attribute>
                </saml:AttributeStatement>
            </saml:Assertion>"#;

        assert_eq!(extract_role_attribute_values(document).unwrap(), vec!["kept"]);
    }

    #[test]
    fn decodes_and_parses_roles() {
        let encoded = STANDARD.encode(RESPONSE);
        let assertion = SAMLAssertion::from_base64(&encoded).unwrap();

        assert_eq!(assertion.encoded_as_base64(), encoded);

        let roles = assertion.extract_roles().unwrap();
        assert_eq!(roles.len(), 3);
        assert_eq!(roles[1].role_arn, "arn:aws:iam::111111111111:role/ReadOnly");
        assert_eq!(roles[1].principal_arn, "arn:aws:iam::111111111111:saml-provider/Idp");
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(matches!(
            SAMLAssertion::from_base64("not base64!"),
            Err(SamlError::Base64(_))
        ));
    }
}
