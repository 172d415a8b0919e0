//! [`KerberosMechanism`] over the system GSS-API library.
use std::path::Path;

use libgssapi::{
    context::{SecurityContext, ServerCtx},
    credential::{Cred, CredUsage},
    error::Error as GssError,
    name::Name,
    oid::{GSS_MECH_KRB5, GSS_NT_KRB5_PRINCIPAL, Oid, OidSet},
};

use crate::{
    error::{ConfigurationError, LoginFailure, NegotiationFailure},
    log::{debug, trace},
    mechanism::{AcceptorContext, EstablishedContext, KerberosMechanism, LoginConfiguration, LoginRequest, MechanismOid},
    principal::ServicePrincipalName,
    subject::ServiceSubject,
};

static GSS_MECH_SPNEGO: Oid = Oid::from_slice(MechanismOid::Spnego.as_der());

fn mech(mechanism: MechanismOid) -> &'static Oid {
    match mechanism {
        MechanismOid::Kerberos => &GSS_MECH_KRB5,
        MechanismOid::Spnego => &GSS_MECH_SPNEGO,
    }
}

fn desired_mechs(mechanism: MechanismOid) -> Result<OidSet, GssError> {
    let mut mechs = OidSet::new()?;
    mechs.add(&GSS_MECH_KRB5)?;
    if mechanism == MechanismOid::Spnego {
        mechs.add(&GSS_MECH_SPNEGO)?;
    }
    Ok(mechs)
}

fn import_name(name: &str) -> Result<Name, GssError> {
    Name::new(name.as_bytes(), Some(&GSS_NT_KRB5_PRINCIPAL))
}

/// Subject material of [`GssapiMechanism`]: the acceptor name whose keys the GSS library was able to load.
///
/// The keys themselves stay inside the library's keytab handling.
#[derive(Debug, Clone)]
pub struct GssSubject {
    acceptor: String,
}

impl GssSubject {
    pub fn acceptor(&self) -> &str {
        &self.acceptor
    }
}

/// GSS-API backed mechanism.
///
/// A configured keytab is registered process wide through `KRB5_KTNAME`. Interactive password logins are not
/// supported; without a keytab the library's default acceptor keytab is used.
///
/// Registering the keytab mutates the process environment. Build the controller from `main` before the async
/// runtime or any other thread is started; building it later is unsound on platforms where reading and writing
/// the environment concurrently is undefined behavior.
#[derive(Debug, Default)]
pub struct GssapiMechanism;

impl GssapiMechanism {
    pub fn new() -> Self {
        Self
    }
}

impl KerberosMechanism for GssapiMechanism {
    /// Sets `KRB5_KTNAME`. Must run before any other thread exists, see [`GssapiMechanism`].
    fn prepare_keytab(&self, keytab: &Path) -> Result<(), ConfigurationError> {
        let keytab = keytab
            .to_str()
            .ok_or_else(|| ConfigurationError::Backend(format!("keytab path {} is not UTF-8", keytab.display())))?;
        // SAFETY: the controller is built single-threaded, before the runtime starts.
        unsafe { std::env::set_var("KRB5_KTNAME", format!("FILE:{keytab}")) };
        debug!(keytab, "registered acceptor keytab");
        Ok(())
    }

    fn login(&self, request: &LoginRequest<'_>) -> Result<ServiceSubject, LoginFailure> {
        let principal = request.principal;
        let rejected = |e: GssError| LoginFailure::Rejected {
            principal: principal.to_string(),
            reason: e.to_string(),
        };
        match request.configuration {
            LoginConfiguration::Interactive(Some(_)) => {
                return Err(LoginFailure::Unsupported(
                    "password login is not available through GSS-API acceptor credentials".into(),
                ));
            }
            LoginConfiguration::Named { name, .. } => {
                debug!(login_context = name, "using system GSS-API configuration");
            }
            LoginConfiguration::Keytab(_) | LoginConfiguration::Interactive(None) => {}
        }
        let name = import_name(principal.as_str()).map_err(rejected)?;
        let mechs = desired_mechs(MechanismOid::Kerberos).map_err(rejected)?;
        let cred = Cred::acquire(Some(&name), None, CredUsage::Accept, Some(&mechs)).map_err(rejected)?;
        if request.debug {
            trace!(%principal, cred = ?cred.info(), "acquired acceptor credentials");
        }
        Ok(ServiceSubject::new(
            principal.clone(),
            GssSubject {
                acceptor: principal.to_string(),
            },
        ))
    }

    fn canonicalize(&self, principal: &ServicePrincipalName, mechanism: MechanismOid) -> Result<String, NegotiationFailure> {
        let invalid = |e: GssError| NegotiationFailure::InvalidName {
            name: principal.to_string(),
            reason: e.to_string(),
        };
        let name = import_name(principal.as_str()).map_err(invalid)?;
        let canonical = name.canonicalize(Some(mech(mechanism))).map_err(invalid)?;
        Ok(canonical.to_string())
    }

    fn accept_context(
        &self,
        subject: &ServiceSubject,
        canonical_name: &str,
        mechanism: MechanismOid,
    ) -> Result<Box<dyn AcceptorContext>, NegotiationFailure> {
        let gss = subject
            .material::<GssSubject>()
            .ok_or_else(|| NegotiationFailure::Rejected("service subject was not acquired through GSS-API".into()))?;
        trace!(acceptor = gss.acceptor(), canonical_name, "creating acceptor context");
        let name = import_name(canonical_name).map_err(|e| NegotiationFailure::InvalidName {
            name: canonical_name.to_owned(),
            reason: e.to_string(),
        })?;
        let cred = desired_mechs(mechanism)
            .and_then(|mechs| Cred::acquire(Some(&name), None, CredUsage::Accept, Some(&mechs)))
            .map_err(|e| NegotiationFailure::Rejected(e.to_string()))?;
        Ok(Box::new(GssAcceptor(ServerCtx::new(cred.into()))))
    }
}

struct GssAcceptor(ServerCtx);

impl AcceptorContext for GssAcceptor {
    fn step(&mut self, token: &[u8]) -> Result<Option<Vec<u8>>, NegotiationFailure> {
        match self.0.step(token) {
            Ok(output) => Ok(output.map(|buf| buf.to_vec())),
            Err(e) => Err(NegotiationFailure::Rejected(e.to_string())),
        }
    }

    fn is_established(&self) -> bool {
        self.0.is_complete()
    }

    fn source_name(&mut self) -> Option<String> {
        self.0.source_name().ok().map(|name| name.to_string())
    }

    fn into_established(self: Box<Self>) -> Box<dyn EstablishedContext> {
        Box::new(GssEstablished(self.0))
    }
}

struct GssEstablished(ServerCtx);

impl EstablishedContext for GssEstablished {
    fn source_name(&mut self) -> Option<String> {
        self.0.source_name().ok().map(|name| name.to_string())
    }
}
