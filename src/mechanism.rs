//! Seam to the Kerberos/GSS implementation.
//!
//! Ticket cryptography and the KDC protocol live behind [`KerberosMechanism`]. The engine only asks it to
//! log in, to canonicalize a service name and to open acceptor contexts bound to a [`ServiceSubject`].
use std::{fmt, path::Path};

use crate::{
    error::{ConfigurationError, LoginFailure, NegotiationFailure},
    principal::ServicePrincipalName,
    subject::{KerberosCallbackHandler, ServiceSubject},
};

const MECH_KERBEROS: &[u8] = b"\x2a\x86\x48\x86\xf7\x12\x01\x02\x02";
const MECH_SPNEGO: &[u8] = b"\x2b\x06\x01\x05\x05\x02";

/// Mechanism the acceptor context is created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MechanismOid {
    /// Kerberos V5, `1.2.840.113554.1.2.2`.
    #[default]
    Kerberos,
    /// SPNEGO, `1.3.6.1.5.5.2`. Negotiates Kerberos inside a single token exchange.
    Spnego,
}

impl MechanismOid {
    pub fn from_config(use_spnego_oid: bool) -> Self {
        if use_spnego_oid { Self::Spnego } else { Self::Kerberos }
    }

    /// DER encoding of the object identifier, without tag and length.
    pub const fn as_der(&self) -> &'static [u8] {
        match self {
            Self::Kerberos => MECH_KERBEROS,
            Self::Spnego => MECH_SPNEGO,
        }
    }

    pub fn dotted(&self) -> &'static str {
        match self {
            Self::Kerberos => "1.2.840.113554.1.2.2",
            Self::Spnego => "1.3.6.1.5.5.2",
        }
    }
}

impl fmt::Display for MechanismOid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dotted())
    }
}

/// How the built-in login obtains the service key material.
#[derive(Clone, Copy)]
pub enum LoginConfiguration<'a> {
    /// Non-interactive login from a keytab resolved at startup.
    Keytab(&'a Path),
    /// Interactive login, prompting through the registered handler if there is one.
    Interactive(Option<&'a dyn KerberosCallbackHandler>),
    /// A login context other than the built-in `KDC` one, configured by the backend itself.
    Named {
        name: &'a str,
        callback: Option<&'a dyn KerberosCallbackHandler>,
    },
}

impl fmt::Debug for LoginConfiguration<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keytab(path) => f.debug_tuple("Keytab").field(path).finish(),
            Self::Interactive(callback) => f.debug_tuple("Interactive").field(&callback.is_some()).finish(),
            Self::Named { name, .. } => f.debug_struct("Named").field("name", name).finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoginRequest<'a> {
    pub principal: &'a ServicePrincipalName,
    pub configuration: LoginConfiguration<'a>,
    pub debug: bool,
}

/// One acceptor-side security context of the underlying mechanism.
pub trait AcceptorContext: Send {
    /// Feeds one client token. Returns the token to send back, if any.
    fn step(&mut self, token: &[u8]) -> Result<Option<Vec<u8>>, NegotiationFailure>;

    fn is_established(&self) -> bool;

    /// Initiator name once established. `None` when the mechanism did not provide one.
    fn source_name(&mut self) -> Option<String>;

    /// Gives up the stepping side of an established context.
    fn into_established(self: Box<Self>) -> Box<dyn EstablishedContext>;
}

/// Established context as seen by downstream code. It has no way to accept further tokens.
pub trait EstablishedContext: Send {
    fn source_name(&mut self) -> Option<String>;
}

/// Trusted Kerberos/GSS capability.
pub trait KerberosMechanism: Send + Sync {
    /// Called once at startup with the resolved keytab.
    fn prepare_keytab(&self, _keytab: &Path) -> Result<(), ConfigurationError> {
        Ok(())
    }

    fn login(&self, request: &LoginRequest<'_>) -> Result<ServiceSubject, LoginFailure>;

    /// Canonical form of `principal` for `mechanism`.
    fn canonicalize(&self, principal: &ServicePrincipalName, mechanism: MechanismOid) -> Result<String, NegotiationFailure>;

    /// Creates a fresh acceptor context using the key material of `subject`.
    fn accept_context(
        &self,
        subject: &ServiceSubject,
        canonical_name: &str,
        mechanism: MechanismOid,
    ) -> Result<Box<dyn AcceptorContext>, NegotiationFailure>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory mechanism.
    //!
    //! Tokens: `accept:<name>` establishes, `mutual:<name>` establishes with a reply token, `anon` establishes
    //! without a source name, `more` asks for another round, `empty` stalls without a token. Anything else fails.
    use std::{
        path::{Path, PathBuf},
        sync::{
            Mutex,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        thread,
        time::Duration,
    };

    use super::*;

    pub(crate) struct ScriptedKey;

    #[derive(Default)]
    pub(crate) struct ScriptedMechanism {
        pub logins: AtomicUsize,
        pub reject_login: AtomicBool,
        pub login_delay: Option<Duration>,
        pub keytabs: Mutex<Vec<PathBuf>>,
        pub last_login: Mutex<Option<String>>,
    }

    impl KerberosMechanism for ScriptedMechanism {
        fn prepare_keytab(&self, keytab: &Path) -> Result<(), ConfigurationError> {
            self.keytabs.lock().unwrap().push(keytab.to_owned());
            Ok(())
        }

        fn login(&self, request: &LoginRequest<'_>) -> Result<ServiceSubject, LoginFailure> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            *self.last_login.lock().unwrap() = Some(format!("{:?}", request.configuration));
            if let Some(delay) = self.login_delay {
                thread::sleep(delay);
            }
            if self.reject_login.load(Ordering::SeqCst) {
                return Err(LoginFailure::Rejected {
                    principal: request.principal.to_string(),
                    reason: "bad keytab".into(),
                });
            }
            if let LoginConfiguration::Interactive(Some(handler)) = request.configuration {
                handler.password(request.principal)?;
            }
            Ok(ServiceSubject::new(request.principal.clone(), ScriptedKey))
        }

        fn canonicalize(&self, principal: &ServicePrincipalName, mechanism: MechanismOid) -> Result<String, NegotiationFailure> {
            if principal.as_str().is_empty() {
                return Err(NegotiationFailure::InvalidName {
                    name: String::new(),
                    reason: "empty".into(),
                });
            }
            Ok(format!("{principal}#{mechanism}"))
        }

        fn accept_context(
            &self,
            subject: &ServiceSubject,
            _canonical_name: &str,
            _mechanism: MechanismOid,
        ) -> Result<Box<dyn AcceptorContext>, NegotiationFailure> {
            if subject.material::<ScriptedKey>().is_none() {
                return Err(NegotiationFailure::Rejected("subject holds no service key".into()));
            }
            Ok(Box::new(ScriptedContext::default()))
        }
    }

    #[derive(Default)]
    pub(crate) struct ScriptedContext {
        established: bool,
        source_name: Option<String>,
    }

    impl AcceptorContext for ScriptedContext {
        fn step(&mut self, token: &[u8]) -> Result<Option<Vec<u8>>, NegotiationFailure> {
            let token = std::str::from_utf8(token).map_err(|e| NegotiationFailure::Rejected(e.to_string()))?;
            if let Some(name) = token.strip_prefix("accept:") {
                self.established = true;
                self.source_name = Some(name.to_owned());
                return Ok(None);
            }
            if let Some(name) = token.strip_prefix("mutual:") {
                self.established = true;
                self.source_name = Some(name.to_owned());
                return Ok(Some(b"mutual".to_vec()));
            }
            match token {
                "anon" => {
                    self.established = true;
                    Ok(None)
                }
                "more" => Ok(Some(b"challenge".to_vec())),
                "empty" => Ok(Some(Vec::new())),
                _ => Err(NegotiationFailure::Rejected("checksum failed".into())),
            }
        }

        fn is_established(&self) -> bool {
            self.established
        }

        fn source_name(&mut self) -> Option<String> {
            self.source_name.clone()
        }

        fn into_established(self: Box<Self>) -> Box<dyn EstablishedContext> {
            Box::new(ScriptedEstablished(self.source_name))
        }
    }

    pub(crate) struct ScriptedEstablished(pub Option<String>);

    impl EstablishedContext for ScriptedEstablished {
        fn source_name(&mut self) -> Option<String> {
            self.0.clone()
        }
    }
}
