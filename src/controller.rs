//! Per-request orchestration: resolve, acquire, negotiate, map.
use std::sync::Arc;

use base64::{Engine, prelude::BASE64_STANDARD};

use crate::{
    config::KerberosConfig,
    engine::{AcceptOutcome, NegotiationEngine},
    error::{AuthenticationError, ConfigurationError, NegotiationFailure},
    identity::AuthenticatedIdentity,
    log::{debug, warn},
    mechanism::{KerberosMechanism, MechanismOid},
    principal::PrincipalResolver,
    subject::{KerberosCallbackHandler, ServicePrincipalSubjectFactory, SubjectProvider, resolve_keytab},
};

/// What one pass through the controller produced.
#[derive(Debug)]
pub enum NegotiationOutcome {
    /// The client is authenticated. `mutual_token` is the base64 reply token, if the mechanism produced one.
    Established {
        identity: AuthenticatedIdentity,
        mutual_token: Option<String>,
    },
    /// Not an error: the client must send a new request answering this base64 challenge.
    ContinueWith(String),
    /// Authentication could not complete for this attempt.
    Failed(AuthenticationError),
}

/// Optional registration of a pluggable collaborator. More than one registration is a configuration error.
enum Registration<T> {
    Empty,
    One(T),
    Ambiguous,
}

impl<T> Registration<T> {
    fn register(&mut self, value: T) {
        *self = match std::mem::replace(self, Self::Empty) {
            Self::Empty => Self::One(value),
            Self::One(_) | Self::Ambiguous => Self::Ambiguous,
        };
    }

    fn resolve(self, collaborator: &'static str) -> Result<Option<T>, ConfigurationError> {
        match self {
            Self::Empty => Ok(None),
            Self::One(value) => Ok(Some(value)),
            Self::Ambiguous => {
                warn!(collaborator, "more than one instance registered");
                Err(ConfigurationError::DuplicateRegistration { collaborator })
            }
        }
    }
}

pub struct NegotiationControllerBuilder {
    config: KerberosConfig,
    mechanism: Arc<dyn KerberosMechanism>,
    subject_factory: Registration<Arc<dyn ServicePrincipalSubjectFactory>>,
    callback_handler: Registration<Arc<dyn KerberosCallbackHandler>>,
}

impl NegotiationControllerBuilder {
    pub fn subject_factory(mut self, factory: Arc<dyn ServicePrincipalSubjectFactory>) -> Self {
        self.subject_factory.register(factory);
        self
    }

    pub fn callback_handler(mut self, handler: Arc<dyn KerberosCallbackHandler>) -> Self {
        self.callback_handler.register(handler);
        self
    }

    /// Validates registrations and resolves the keytab. Nothing is deferred to request time.
    ///
    /// [`KerberosMechanism::prepare_keytab`] runs here and may change process-wide state (the `gssapi` backend
    /// sets `KRB5_KTNAME`), so build before starting the async runtime or any other thread.
    pub fn build(self) -> Result<NegotiationController, ConfigurationError> {
        let factory = self.subject_factory.resolve("ServicePrincipalSubjectFactory")?;
        let callback = self.callback_handler.resolve("KerberosCallbackHandler")?;
        let keytab = match &self.config.keytab_path {
            Some(configured) => {
                let keytab = resolve_keytab(configured, &self.config.resource_dirs)?;
                self.mechanism.prepare_keytab(&keytab)?;
                Some(keytab)
            }
            None => None,
        };
        let config = self.config;
        let subjects = SubjectProvider::new(
            self.mechanism.clone(),
            factory,
            callback,
            keytab,
            config.login_context_name,
            config.debug,
            config.cache_subjects,
        );
        Ok(NegotiationController {
            resolver: PrincipalResolver::new(config.service_principal_name, config.service_principal_realm),
            subjects,
            engine: NegotiationEngine::new(self.mechanism, MechanismOid::from_config(config.use_spnego_oid)),
        })
    }
}

/// Runs one negotiation attempt per request. Multi-round exchanges are driven by the client re-sending.
pub struct NegotiationController {
    resolver: PrincipalResolver,
    subjects: SubjectProvider,
    engine: NegotiationEngine,
}

impl NegotiationController {
    pub fn builder(config: KerberosConfig, mechanism: Arc<dyn KerberosMechanism>) -> NegotiationControllerBuilder {
        NegotiationControllerBuilder {
            config,
            mechanism,
            subject_factory: Registration::Empty,
            callback_handler: Registration::Empty,
        }
    }

    /// Authenticates `token` (base64) for a request addressed to `request_host`.
    ///
    /// Blocks while logging in and accepting the token.
    pub fn authenticate(&self, request_host: &str, token: &str) -> NegotiationOutcome {
        match self.try_authenticate(request_host, token) {
            Ok(outcome) => outcome,
            Err(e) => NegotiationOutcome::Failed(e),
        }
    }

    /// [`authenticate`](Self::authenticate) on the blocking thread pool.
    pub async fn authenticate_blocking(self: Arc<Self>, request_host: String, token: String) -> NegotiationOutcome {
        tokio::task::spawn_blocking(move || self.authenticate(&request_host, &token))
            .await
            .unwrap_or_else(|e| NegotiationOutcome::Failed(NegotiationFailure::Worker(e.to_string()).into()))
    }

    fn try_authenticate(&self, request_host: &str, token: &str) -> Result<NegotiationOutcome, AuthenticationError> {
        let principal = self.resolver.resolve(request_host);
        let subject = self.subjects.get_subject(&principal)?;
        let token = BASE64_STANDARD.decode(token).map_err(NegotiationFailure::from)?;
        match self.engine.accept_token(&subject, &principal, &token) {
            AcceptOutcome::Established {
                source_name,
                output,
                context,
            } => {
                let identity = AuthenticatedIdentity::map(source_name.as_deref(), context).inspect_err(|_| {
                    debug!(%principal, "established context has no source name");
                })?;
                Ok(NegotiationOutcome::Established {
                    identity,
                    mutual_token: output.map(|token| BASE64_STANDARD.encode(token)),
                })
            }
            AcceptOutcome::ContinueNeeded(output) => {
                debug!(%principal, "token processed, continue to negotiate");
                Ok(NegotiationOutcome::ContinueWith(BASE64_STANDARD.encode(output)))
            }
            AcceptOutcome::Failed(e) => Err(e.into()),
        }
    }
}
