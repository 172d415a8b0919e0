//! Service credential acquisition.
use std::{
    any::Any,
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    error::{ConfigurationError, LoginFailure},
    log::{debug, warn},
    mechanism::{KerberosMechanism, LoginConfiguration, LoginRequest},
    principal::ServicePrincipalName,
};

/// Login context name selecting the built-in keytab or interactive login.
pub const DEFAULT_LOGIN_CONTEXT_NAME: &str = "KDC";

/// Authenticated key material of the service. Read-only once acquired and cheap to clone.
#[derive(Clone)]
pub struct ServiceSubject {
    principal: ServicePrincipalName,
    material: Arc<dyn Any + Send + Sync>,
}

impl ServiceSubject {
    pub fn new<T: Any + Send + Sync>(principal: ServicePrincipalName, material: T) -> Self {
        Self {
            principal,
            material: Arc::new(material),
        }
    }

    pub fn principal(&self) -> &ServicePrincipalName {
        &self.principal
    }

    /// Backend specific key material, if it is of type `T`.
    pub fn material<T: Any>(&self) -> Option<&T> {
        self.material.downcast_ref()
    }
}

impl fmt::Debug for ServiceSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSubject")
            .field("principal", &self.principal)
            .finish_non_exhaustive()
    }
}

/// External strategy that supplies the service subject itself.
///
/// Returning `None` falls back to the built-in login.
pub trait ServicePrincipalSubjectFactory: Send + Sync {
    fn subject_for(&self, principal: &ServicePrincipalName) -> Option<ServiceSubject>;
}

/// Supplies the password for an interactive login.
pub trait KerberosCallbackHandler: Send + Sync {
    fn password(&self, principal: &ServicePrincipalName) -> Result<String, LoginFailure>;
}

/// Finds the configured keytab: first under each resource directory, then as a plain path.
pub fn resolve_keytab(configured: &str, resource_dirs: &[PathBuf]) -> Result<PathBuf, ConfigurationError> {
    let relative = configured.trim_start_matches('/');
    let from_resources = resource_dirs
        .iter()
        .map(|dir| dir.join(relative))
        .find(|candidate| candidate.is_file());
    if let Some(path) = from_resources {
        return Ok(path);
    }
    let path = Path::new(configured);
    if path.exists() {
        return Ok(path.to_owned());
    }
    warn!(keytab = configured, "keytab file is not available");
    Err(ConfigurationError::KeytabNotFound { path: path.to_owned() })
}

/// Acquires the [`ServiceSubject`] for a principal.
pub struct SubjectProvider {
    mechanism: Arc<dyn KerberosMechanism>,
    factory: Option<Arc<dyn ServicePrincipalSubjectFactory>>,
    callback: Option<Arc<dyn KerberosCallbackHandler>>,
    keytab: Option<PathBuf>,
    login_context_name: String,
    debug: bool,
    cache: Option<SubjectCache>,
}

impl SubjectProvider {
    pub(crate) fn new(
        mechanism: Arc<dyn KerberosMechanism>,
        factory: Option<Arc<dyn ServicePrincipalSubjectFactory>>,
        callback: Option<Arc<dyn KerberosCallbackHandler>>,
        keytab: Option<PathBuf>,
        login_context_name: String,
        debug: bool,
        cache_subjects: bool,
    ) -> Self {
        Self {
            mechanism,
            factory,
            callback,
            keytab,
            login_context_name,
            debug,
            cache: cache_subjects.then(SubjectCache::default),
        }
    }

    pub fn get_subject(&self, principal: &ServicePrincipalName) -> Result<ServiceSubject, LoginFailure> {
        match &self.cache {
            Some(cache) => cache.get_or_acquire(principal, || self.acquire(principal)),
            None => self.acquire(principal),
        }
    }

    fn acquire(&self, principal: &ServicePrincipalName) -> Result<ServiceSubject, LoginFailure> {
        if let Some(factory) = &self.factory {
            if let Some(subject) = factory.subject_for(principal) {
                debug!(%principal, "service subject provided by factory");
                return Ok(subject);
            }
        }
        let callback = self.callback.as_deref();
        let configuration = if self.login_context_name != DEFAULT_LOGIN_CONTEXT_NAME {
            LoginConfiguration::Named {
                name: &self.login_context_name,
                callback,
            }
        } else if let Some(keytab) = &self.keytab {
            LoginConfiguration::Keytab(keytab)
        } else {
            LoginConfiguration::Interactive(callback)
        };
        debug!(%principal, ?configuration, "logging in service principal");
        let request = LoginRequest {
            principal,
            configuration,
            debug: self.debug,
        };
        self.mechanism.login(&request).inspect_err(|e| {
            debug!(%principal, error = %e, "login failed");
        })
    }
}

type Slot = Arc<Mutex<Option<ServiceSubject>>>;

/// Per-principal cache where only the first caller logs in and the others wait for its result.
#[derive(Default)]
struct SubjectCache {
    slots: Mutex<HashMap<ServicePrincipalName, Slot>>,
}

impl SubjectCache {
    fn get_or_acquire(
        &self,
        principal: &ServicePrincipalName,
        acquire: impl FnOnce() -> Result<ServiceSubject, LoginFailure>,
    ) -> Result<ServiceSubject, LoginFailure> {
        let slot = lock(&self.slots).entry(principal.clone()).or_default().clone();
        let mut guard = lock(&slot);
        if let Some(subject) = guard.as_ref() {
            return Ok(subject.clone());
        }
        match acquire() {
            Ok(subject) => {
                *guard = Some(subject.clone());
                Ok(subject)
            }
            Err(e) => {
                drop(guard);
                self.evict_if_unused(principal, &slot);
                Err(e)
            }
        }
    }

    /// Drops an empty slot nobody else is waiting on, so failed principals do not accumulate.
    fn evict_if_unused(&self, principal: &ServicePrincipalName, slot: &Slot) {
        let mut slots = lock(&self.slots);
        let unused = slots
            .get(principal)
            .is_some_and(|entry| Arc::ptr_eq(entry, slot) && Arc::strong_count(slot) == 2 && lock(slot).is_none());
        if unused {
            slots.remove(principal);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        lock(&self.slots).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        sync::atomic::Ordering,
        thread,
        time::Duration,
    };

    use super::*;
    use crate::mechanism::testing::{ScriptedKey, ScriptedMechanism};

    struct FixedFactory(Option<&'static str>);

    impl ServicePrincipalSubjectFactory for FixedFactory {
        fn subject_for(&self, principal: &ServicePrincipalName) -> Option<ServiceSubject> {
            self.0.map(|tag| ServiceSubject::new(principal.clone(), tag))
        }
    }

    struct StaticPassword;

    impl KerberosCallbackHandler for StaticPassword {
        fn password(&self, _principal: &ServicePrincipalName) -> Result<String, LoginFailure> {
            Ok("secret".into())
        }
    }

    fn provider(
        mechanism: &Arc<ScriptedMechanism>,
        factory: Option<Arc<dyn ServicePrincipalSubjectFactory>>,
        keytab: Option<PathBuf>,
        login_context_name: &str,
        cache: bool,
    ) -> SubjectProvider {
        SubjectProvider::new(
            mechanism.clone(),
            factory,
            Some(Arc::new(StaticPassword)),
            keytab,
            login_context_name.into(),
            false,
            cache,
        )
    }

    fn spn() -> ServicePrincipalName {
        ServicePrincipalName::resolve("host", None, Some("EXAMPLE.COM"))
    }

    #[test]
    fn factory_subject_wins_over_login() {
        let mechanism = Arc::new(ScriptedMechanism::default());
        let provider = provider(&mechanism, Some(Arc::new(FixedFactory(Some("external")))), None, "KDC", false);
        let subject = provider.get_subject(&spn()).unwrap();
        assert_eq!(subject.material::<&str>(), Some(&"external"));
        assert_eq!(mechanism.logins.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_factory_falls_back_to_login() {
        let mechanism = Arc::new(ScriptedMechanism::default());
        let provider = provider(&mechanism, Some(Arc::new(FixedFactory(None))), None, "KDC", false);
        let subject = provider.get_subject(&spn()).unwrap();
        assert!(subject.material::<ScriptedKey>().is_some());
        assert_eq!(mechanism.logins.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn keytab_login_is_preferred_over_interactive() {
        let mechanism = Arc::new(ScriptedMechanism::default());
        let provider = provider(&mechanism, None, Some(PathBuf::from("/etc/http.keytab")), "KDC", false);
        provider.get_subject(&spn()).unwrap();
        let login = mechanism.last_login.lock().unwrap().clone().unwrap();
        assert!(login.starts_with("Keytab"), "{login}");
    }

    #[test]
    fn interactive_login_without_keytab() {
        let mechanism = Arc::new(ScriptedMechanism::default());
        let provider = provider(&mechanism, None, None, "KDC", false);
        provider.get_subject(&spn()).unwrap();
        let login = mechanism.last_login.lock().unwrap().clone().unwrap();
        assert_eq!(login, "Interactive(true)");
    }

    #[test]
    fn custom_login_context_is_delegated() {
        let mechanism = Arc::new(ScriptedMechanism::default());
        let provider = provider(&mechanism, None, Some(PathBuf::from("/etc/http.keytab")), "Custom", false);
        provider.get_subject(&spn()).unwrap();
        let login = mechanism.last_login.lock().unwrap().clone().unwrap();
        assert!(login.contains("\"Custom\""), "{login}");
    }

    #[test]
    fn logs_in_on_every_request_by_default() {
        let mechanism = Arc::new(ScriptedMechanism::default());
        let provider = provider(&mechanism, None, None, "KDC", false);
        provider.get_subject(&spn()).unwrap();
        provider.get_subject(&spn()).unwrap();
        assert_eq!(mechanism.logins.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn login_rejection_is_reported() {
        let mechanism = Arc::new(ScriptedMechanism::default());
        mechanism.reject_login.store(true, Ordering::SeqCst);
        let provider = provider(&mechanism, None, None, "KDC", true);
        let error = provider.get_subject(&spn()).unwrap_err();
        assert!(matches!(error, LoginFailure::Rejected { .. }));

        mechanism.reject_login.store(false, Ordering::SeqCst);
        provider.get_subject(&spn()).unwrap();
        assert_eq!(mechanism.logins.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rejected_principals_are_not_cached() {
        let mechanism = Arc::new(ScriptedMechanism::default());
        mechanism.reject_login.store(true, Ordering::SeqCst);
        let provider = provider(&mechanism, None, None, "KDC", true);
        for i in 0..1000 {
            let principal = ServicePrincipalName::resolve(&format!("host-{i}.example.com"), None, Some("EXAMPLE.COM"));
            provider.get_subject(&principal).unwrap_err();
        }
        assert_eq!(provider.cache.as_ref().map(SubjectCache::len), Some(0));

        mechanism.reject_login.store(false, Ordering::SeqCst);
        provider.get_subject(&spn()).unwrap();
        provider.get_subject(&spn()).unwrap();
        assert_eq!(provider.cache.as_ref().map(SubjectCache::len), Some(1));
        assert_eq!(mechanism.logins.load(Ordering::SeqCst), 1001);
    }

    #[test]
    fn cached_subject_is_acquired_once_under_contention() {
        let mechanism = Arc::new(ScriptedMechanism {
            login_delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let provider = Arc::new(provider(&mechanism, None, None, "KDC", true));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = provider.clone();
                thread::spawn(move || provider.get_subject(&spn()).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(mechanism.logins.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn keytab_is_found_in_resource_dir_first() {
        let root = std::env::temp_dir().join(format!("negotiate-keytab-{}", std::process::id()));
        fs::create_dir_all(root.join("conf")).unwrap();
        fs::write(root.join("conf/http.keytab"), b"keys").unwrap();

        let resolved = resolve_keytab("/conf/http.keytab", std::slice::from_ref(&root)).unwrap();
        assert_eq!(resolved, root.join("conf/http.keytab"));

        let absolute = root.join("conf/http.keytab");
        let resolved = resolve_keytab(absolute.to_str().unwrap(), &[]).unwrap();
        assert_eq!(resolved, absolute);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn missing_keytab_is_a_configuration_error() {
        let error = resolve_keytab("/definitely/not/here.keytab", &[]).unwrap_err();
        assert!(matches!(error, ConfigurationError::KeytabNotFound { .. }));
    }
}
