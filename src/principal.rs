//! Service principal name resolution.
use std::fmt;

use crate::log::trace;

const DEFAULT_SERVICE: &str = "HTTP/";

/// Canonical service identity of the form `SERVICE/host[@REALM]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServicePrincipalName(String);

impl ServicePrincipalName {
    /// Builds the principal for a request addressed to `request_host`.
    ///
    /// `override_name` replaces `HTTP/<host>` entirely. Anything from the first `:` onward is removed to
    /// drop a port, which also truncates IPv6 literals; hosts are expected to be DNS names.
    pub fn resolve(request_host: &str, override_name: Option<&str>, realm: Option<&str>) -> Self {
        let mut name = match override_name {
            Some(name) => name.to_owned(),
            None => format!("{DEFAULT_SERVICE}{request_host}"),
        };
        if let Some(port_index) = name.find(':').filter(|&index| index > 0) {
            name.truncate(port_index);
        }
        if let Some(realm) = realm {
            name.push('@');
            name.push_str(realm);
        }
        trace!(principal = %name, "resolved service principal");
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServicePrincipalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ServicePrincipalName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resolves principals from the configured override and realm.
#[derive(Debug, Clone, Default)]
pub struct PrincipalResolver {
    override_name: Option<String>,
    realm: Option<String>,
}

impl PrincipalResolver {
    pub fn new(override_name: Option<String>, realm: Option<String>) -> Self {
        Self { override_name, realm }
    }

    pub fn resolve(&self, request_host: &str) -> ServicePrincipalName {
        ServicePrincipalName::resolve(request_host, self.override_name.as_deref(), self.realm.as_deref())
    }
}
