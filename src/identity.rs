use crate::{engine::NegotiatedContext, error::NegotiationFailure};

/// Client principal taken from an established context's source name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KerberosPrincipal {
    simple_name: String,
    full_name: String,
}

impl KerberosPrincipal {
    /// Splits `source_name` at its last `@`. A name without a realm is its own simple name.
    pub fn from_source_name(source_name: &str) -> Self {
        let simple_name = match source_name.rfind('@') {
            Some(index) if index > 0 => &source_name[..index],
            _ => source_name,
        };
        Self {
            simple_name: simple_name.to_owned(),
            full_name: source_name.to_owned(),
        }
    }

    /// Name without the realm, used for authorization decisions.
    pub fn simple_name(&self) -> &str {
        &self.simple_name
    }

    /// The complete GSS source name, e.g. `alice@EXAMPLE.COM`.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }
}

/// Identity produced by a successful negotiation.
#[derive(Debug, Clone)]
pub struct AuthenticatedIdentity {
    principal: KerberosPrincipal,
    context: NegotiatedContext,
}

impl AuthenticatedIdentity {
    /// Maps a source name to an identity. An absent source name is a protocol violation.
    pub fn map(source_name: Option<&str>, context: NegotiatedContext) -> Result<Self, NegotiationFailure> {
        let source_name = source_name.ok_or(NegotiationFailure::MissingSourceName)?;
        Ok(Self {
            principal: KerberosPrincipal::from_source_name(source_name),
            context,
        })
    }

    pub fn principal(&self) -> &KerberosPrincipal {
        &self.principal
    }

    pub fn simple_name(&self) -> &str {
        self.principal.simple_name()
    }

    pub fn full_name(&self) -> &str {
        self.principal.full_name()
    }

    /// Opaque handle to the established context, for delegation by downstream code.
    pub fn context(&self) -> &NegotiatedContext {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mechanism::MechanismOid;

    #[test]
    fn splits_realm_from_simple_name() {
        let principal = KerberosPrincipal::from_source_name("alice@EXAMPLE.COM");
        assert_eq!(principal.simple_name(), "alice");
        assert_eq!(principal.full_name(), "alice@EXAMPLE.COM");
    }

    #[test]
    fn name_without_realm_is_unchanged() {
        let principal = KerberosPrincipal::from_source_name("alice");
        assert_eq!(principal.simple_name(), "alice");
        assert_eq!(principal.full_name(), "alice");
    }

    #[test]
    fn splits_at_last_at_sign() {
        let principal = KerberosPrincipal::from_source_name("alice@corp@EXAMPLE.COM");
        assert_eq!(principal.simple_name(), "alice@corp");
    }

    #[test]
    fn missing_source_name_is_rejected() {
        let context = NegotiatedContext::detached(MechanismOid::Kerberos);
        let error = AuthenticatedIdentity::map(None, context).unwrap_err();
        assert!(matches!(error, NegotiationFailure::MissingSourceName));
    }
}
