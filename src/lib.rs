//! Keeps AWS credential profiles in sync with the roles a SAML identity
//! provider grants.
//!
//! The assertion's role attribute is parsed into [`role::RoleBinding`]s, each
//! binding is named after its account alias and role, and
//! [`reconcile::Reconciler`] makes the managed profiles in the shared
//! credentials file match that set.

pub mod arn;
pub mod aws;
pub mod form_login;
pub mod http_client;
pub mod identity_provider;
pub mod profiles;
pub mod reconcile;
pub mod role;
pub mod saml;
pub mod settings;
pub mod ui;
