//! The accept step of the GSS cycle.
use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use crate::{
    error::NegotiationFailure,
    log::debug,
    mechanism::{AcceptorContext, EstablishedContext, KerberosMechanism, MechanismOid},
    principal::ServicePrincipalName,
    subject::ServiceSubject,
};

/// Progress of a [`MechanismContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    New,
    ContinueNeeded,
    Established,
    Failed,
}

impl ContextState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Established | Self::Failed)
    }
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "new",
            Self::ContinueNeeded => "continue-needed",
            Self::Established => "established",
            Self::Failed => "failed",
        })
    }
}

/// Result of a single successful step.
#[derive(Debug)]
pub enum StepOutcome {
    Established {
        source_name: Option<String>,
        output: Option<Vec<u8>>,
    },
    ContinueNeeded(Vec<u8>),
}

/// Acceptor context owned by exactly one negotiation attempt.
///
/// Once established or failed it refuses further tokens; a retry needs a new context.
pub struct MechanismContext {
    inner: Box<dyn AcceptorContext>,
    mechanism: MechanismOid,
    state: ContextState,
}

impl MechanismContext {
    pub fn new(inner: Box<dyn AcceptorContext>, mechanism: MechanismOid) -> Self {
        Self {
            inner,
            mechanism,
            state: ContextState::New,
        }
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn mechanism(&self) -> MechanismOid {
        self.mechanism
    }

    pub fn accept(&mut self, token: &[u8]) -> Result<StepOutcome, NegotiationFailure> {
        if self.state.is_terminal() {
            return Err(NegotiationFailure::ContextTerminated(self.state));
        }
        let result = self.inner.step(token).and_then(|output| {
            if self.inner.is_established() {
                let source_name = self.inner.source_name();
                Ok(StepOutcome::Established {
                    source_name,
                    output: output.filter(|token| !token.is_empty()),
                })
            } else {
                match output {
                    Some(token) if !token.is_empty() => Ok(StepOutcome::ContinueNeeded(token)),
                    _ => Err(NegotiationFailure::NoContinuationToken),
                }
            }
        });
        self.state = match &result {
            Ok(StepOutcome::Established { .. }) => ContextState::Established,
            Ok(StepOutcome::ContinueNeeded(_)) => ContextState::ContinueNeeded,
            Err(_) => ContextState::Failed,
        };
        result
    }

    fn into_negotiated(self) -> NegotiatedContext {
        NegotiatedContext {
            mechanism: self.mechanism,
            inner: Arc::new(Mutex::new(self.inner.into_established())),
        }
    }
}

impl fmt::Debug for MechanismContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MechanismContext")
            .field("mechanism", &self.mechanism)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Established context handed to downstream code, e.g. for delegation.
///
/// It only exposes an [`EstablishedContext`], so no further token can be submitted through it:
///
/// ```compile_fail
/// fn step_again(context: &axum_negotiate_kerberos::NegotiatedContext) {
///     context.with_context(|established| established.step(b"token"));
/// }
/// ```
#[derive(Clone)]
pub struct NegotiatedContext {
    mechanism: MechanismOid,
    inner: Arc<Mutex<Box<dyn EstablishedContext>>>,
}

impl NegotiatedContext {
    pub fn mechanism(&self) -> MechanismOid {
        self.mechanism
    }

    pub fn source_name(&self) -> Option<String> {
        self.with_context(|context| context.source_name())
    }

    /// Runs `f` with exclusive access to the underlying mechanism context.
    pub fn with_context<R>(&self, f: impl FnOnce(&mut dyn EstablishedContext) -> R) -> R {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(inner.as_mut())
    }

    #[cfg(test)]
    pub(crate) fn detached(mechanism: MechanismOid) -> Self {
        let inner: Box<dyn EstablishedContext> = Box::new(crate::mechanism::testing::ScriptedEstablished(None));
        Self {
            mechanism,
            inner: Arc::new(Mutex::new(inner)),
        }
    }
}

impl fmt::Debug for NegotiatedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiatedContext")
            .field("mechanism", &self.mechanism)
            .finish_non_exhaustive()
    }
}

/// Outcome of [`NegotiationEngine::accept_token`].
#[derive(Debug)]
pub enum AcceptOutcome {
    Established {
        source_name: Option<String>,
        output: Option<Vec<u8>>,
        context: NegotiatedContext,
    },
    ContinueNeeded(Vec<u8>),
    Failed(NegotiationFailure),
}

/// Creates mechanism contexts and performs one accept step.
pub struct NegotiationEngine {
    mechanism: Arc<dyn KerberosMechanism>,
    oid: MechanismOid,
}

impl NegotiationEngine {
    pub fn new(mechanism: Arc<dyn KerberosMechanism>, oid: MechanismOid) -> Self {
        Self { mechanism, oid }
    }

    /// Opens a fresh context for `principal` bound to the key material of `subject`.
    pub fn create_context(
        &self,
        subject: &ServiceSubject,
        principal: &ServicePrincipalName,
    ) -> Result<MechanismContext, NegotiationFailure> {
        let canonical_name = self.mechanism.canonicalize(principal, self.oid)?;
        let inner = self.mechanism.accept_context(subject, &canonical_name, self.oid)?;
        Ok(MechanismContext::new(inner, self.oid))
    }

    /// Runs one accept step on a brand-new context. Mechanism errors become [`AcceptOutcome::Failed`].
    pub fn accept_token(&self, subject: &ServiceSubject, principal: &ServicePrincipalName, token: &[u8]) -> AcceptOutcome {
        let mut context = match self.create_context(subject, principal) {
            Ok(context) => context,
            Err(e) => return AcceptOutcome::Failed(e),
        };
        match context.accept(token) {
            Ok(StepOutcome::Established { source_name, output }) => AcceptOutcome::Established {
                source_name,
                output,
                context: context.into_negotiated(),
            },
            Ok(StepOutcome::ContinueNeeded(output)) => AcceptOutcome::ContinueNeeded(output),
            Err(e) => {
                debug!(%principal, mechanism = %self.oid, error = %e, "token rejected");
                AcceptOutcome::Failed(e)
            }
        }
    }
}
