//! Configuration of the negotiation engine.
use std::path::PathBuf;

use serde::Deserialize;

use crate::subject::DEFAULT_LOGIN_CONTEXT_NAME;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct KerberosConfig {
    /// Login context used to acquire the service subject. `KDC` selects the built-in keytab or interactive login.
    pub login_context_name: String,

    /// Create contexts for the SPNEGO mechanism instead of plain Kerberos.
    pub use_spnego_oid: bool,

    /// Replaces the `HTTP/<request host>` service principal name.
    pub service_principal_name: Option<String>,

    /// Realm appended to the service principal name.
    pub service_principal_realm: Option<String>,

    /// Keytab of the service principal, checked once at startup.
    pub keytab_path: Option<String>,

    /// Directories searched for `keytab_path` before treating it as a filesystem path.
    pub resource_dirs: Vec<PathBuf>,

    /// Reuse one service subject per principal instead of logging in on every request.
    pub cache_subjects: bool,

    /// Ask the credential backend for verbose login output.
    pub debug: bool,
}

impl Default for KerberosConfig {
    fn default() -> Self {
        Self {
            login_context_name: DEFAULT_LOGIN_CONTEXT_NAME.to_owned(),
            use_spnego_oid: false,
            service_principal_name: None,
            service_principal_realm: None,
            keytab_path: None,
            resource_dirs: Vec::new(),
            cache_subjects: false,
            debug: false,
        }
    }
}
