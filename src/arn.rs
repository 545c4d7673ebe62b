//! Amazon Resource Names.
//!
//! An ARN is six colon-delimited fields:
//! `arn:partition:service:region:account:resource`. The resource field is
//! kept whole and may itself contain `:` or `/`.

use std::fmt;
use std::str::FromStr;

const DELIMITER: char = ':';
const TAG: &str = "arn";
const PARTITIONS: [&str; 2] = ["aws", "aws-us-gov"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ArnError {
    #[error("invalid ARN: {0}")]
    InvalidArn(String),

    #[error("invalid ARN resource: {0}")]
    InvalidResource(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account: String,
    pub resource: String,
}

impl Arn {
    pub fn parse(raw: &str) -> Result<Self, ArnError> {
        let parts = raw.splitn(6, DELIMITER).collect::<Vec<_>>();
        if parts.len() < 6 {
            return Err(ArnError::InvalidArn(raw.to_string()));
        }

        if parts[0] != TAG || !PARTITIONS.contains(&parts[1]) {
            return Err(ArnError::InvalidArn(raw.to_string()));
        }

        Ok(Self {
            partition: parts[1].to_string(),
            service: parts[2].to_string(),
            region: parts[3].to_string(),
            account: parts[4].to_string(),
            resource: parts[5].to_string(),
        })
    }

    /// The resource id, e.g. `Admin` for `...:role/Admin`.
    pub fn resource_id(&self) -> Result<&str, ArnError> {
        split_resource(&self.resource).map(|(_, id)| id)
    }
}

/// Splits a resource such as `role/Admin` into its type and id.
///
/// Exactly one `/` with non-empty text on both sides is accepted.
pub fn split_resource(resource: &str) -> Result<(&str, &str), ArnError> {
    let mut parts = resource.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(kind), Some(id), None) if !kind.is_empty() && !id.is_empty() => Ok((kind, id)),
        _ => Err(ArnError::InvalidResource(resource.to_string())),
    }
}

impl FromStr for Arn {
    type Err = ArnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{TAG}:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account, self.resource
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_role_arn() {
        let arn: Arn = "arn:aws:iam::111111111111:role/Admin".parse().unwrap();

        assert_eq!(arn.partition, "aws");
        assert_eq!(arn.service, "iam");
        assert_eq!(arn.region, "");
        assert_eq!(arn.account, "111111111111");
        assert_eq!(arn.resource, "role/Admin");
        assert_eq!(arn.resource_id().unwrap(), "Admin");
    }

    #[test]
    fn round_trips_through_display() {
        let inputs = [
            "arn:aws:iam::111111111111:role/Admin",
            "arn:aws-us-gov:iam::222222222222:saml-provider/Idp",
            "arn:aws:s3:us-east-1:333333333333:bucket:with:colons",
            "arn:aws:sts::444444444444:assumed-role/path/to/Role",
        ];

        for input in inputs {
            assert_eq!(Arn::parse(input).unwrap().to_string(), input);
        }
    }

    #[test]
    fn rejects_malformed_arns() {
        let inputs = [
            "",
            "arn:aws:iam::111111111111",
            "arn:aws-cn:iam::111111111111:role/Admin",
            "urn:aws:iam::111111111111:role/Admin",
            "ARN:aws:iam::111111111111:role/Admin",
        ];

        for input in inputs {
            assert_eq!(
                Arn::parse(input),
                Err(ArnError::InvalidArn(input.to_string())),
                "{input}"
            );
        }
    }

    #[test]
    fn splits_resource_on_a_single_separator() {
        assert_eq!(split_resource("role/Foo"), Ok(("role", "Foo")));

        for resource in ["role", "a/b/c", "/Foo", "role/", ""] {
            assert_eq!(
                split_resource(resource),
                Err(ArnError::InvalidResource(resource.to_string())),
                "{resource}"
            );
        }
    }
}
