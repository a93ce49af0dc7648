//! Interception registry
//!
//! The [`InterceptionRegistry`] holds the ordered list of replacement
//! providers. Registration appends; resolution scans in reverse registration
//! order and returns the most recent provider whose selector matches the
//! target with a usable signature, which is what gives last-registration-wins
//! semantics without explicit priorities.
//!
//! The registry is shared mutable state behind one coarse lock. Resolution
//! clones the winning handler out of the lock so handlers never run while the
//! list is locked.

use crate::error::RuntimeError;
use crate::signature::{compatible, HandlerSignature, MatchQuality};
use crate::value::Value;
use deflect_bytecode::{CallSelector, MethodIdentity};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// One intercepted call, as a handler sees it
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Identity of the original call target
    pub target: MethodIdentity,
    /// Receiver value for instance members, `None` for static members and
    /// constructors
    pub receiver: Option<Value>,
    /// Argument values in declaration order, excluding the receiver
    pub args: Vec<Value>,
}

/// Handler function: receives the invocation, produces the replacement result
pub type HandlerFn = Arc<dyn Fn(&Invocation) -> Result<Value, RuntimeError> + Send + Sync>;

/// A replacement handler
///
/// Typed handlers declare a [`HandlerSignature`] and are shape-checked at
/// registration. Raw handlers take the invocation as-is and are exempt from
/// shape checking, which makes them the only handler kind usable with broad
/// selectors.
#[derive(Clone)]
pub struct Handler {
    signature: Option<HandlerSignature>,
    invoke: HandlerFn,
}

impl Handler {
    /// A raw handler, exempt from registration-time shape checking
    pub fn raw<F>(f: F) -> Self
    where
        F: Fn(&Invocation) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        Self {
            signature: None,
            invoke: Arc::new(f),
        }
    }

    /// A typed handler, shape-checked against the selected target at
    /// registration time
    pub fn typed<F>(signature: HandlerSignature, f: F) -> Self
    where
        F: Fn(&Invocation) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        Self {
            signature: Some(signature),
            invoke: Arc::new(f),
        }
    }

    /// The declared signature, `None` for raw handlers
    pub fn signature(&self) -> Option<&HandlerSignature> {
        self.signature.as_ref()
    }

    /// Invoke the handler
    pub fn invoke(&self, invocation: &Invocation) -> Result<Value, RuntimeError> {
        (self.invoke)(invocation)
    }

    /// Grade this handler against a concrete target. Raw handlers accept
    /// anything their selector matched.
    fn quality_for(&self, target: &MethodIdentity) -> MatchQuality {
        match &self.signature {
            Some(signature) => compatible(signature, target),
            None => MatchQuality::Exact,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.signature {
            Some(signature) => f.debug_tuple("Handler::typed").field(signature).finish(),
            None => f.write_str("Handler::raw"),
        }
    }
}

/// Opaque token returned by `register`, used to remove that registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationHandle(u64);

struct Provider {
    handle: RegistrationHandle,
    selector: CallSelector,
    handler: Handler,
}

#[derive(Default)]
struct RegistryInner {
    providers: Vec<Provider>,
    next_handle: u64,
}

/// Ordered provider list with coarse-locked registration and resolution
#[derive(Default)]
pub struct InterceptionRegistry {
    inner: Mutex<RegistryInner>,
}

static GLOBAL_REGISTRY: LazyLock<InterceptionRegistry> =
    LazyLock::new(InterceptionRegistry::new);

impl InterceptionRegistry {
    /// Create an isolated registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry
    pub fn global() -> &'static InterceptionRegistry {
        &GLOBAL_REGISTRY
    }

    /// Register a handler for the calls `selector` matches.
    ///
    /// Typed handlers are validated here, never at dispatch time: the
    /// selector must name a concrete identity the handler's shape can serve.
    /// A typed handler under a broad selector is rejected because no
    /// satisfying identity exists to check it against; use a raw handler.
    pub fn register(
        &self,
        selector: CallSelector,
        handler: Handler,
    ) -> Result<RegistrationHandle, RuntimeError> {
        if let Some(signature) = handler.signature() {
            match selector.exact_identity() {
                Some(identity) => {
                    if compatible(signature, identity) == MatchQuality::Incompatible {
                        return Err(RuntimeError::IncompatibleSignature {
                            target: identity.display_name(),
                            reason: format!(
                                "handler shape {:?} cannot serve the selected member",
                                signature
                            ),
                        });
                    }
                }
                None => {
                    return Err(RuntimeError::IncompatibleSignature {
                        target: format!("{:?}", selector),
                        reason: "typed handlers require an exact selector; \
                                 use a raw handler for broad selectors"
                            .to_string(),
                    });
                }
            }
        }

        let mut inner = self.inner.lock();
        let handle = RegistrationHandle(inner.next_handle);
        inner.next_handle += 1;
        inner.providers.push(Provider {
            handle,
            selector,
            handler,
        });
        Ok(handle)
    }

    /// Resolve the provider for an intercepted target: the most recently
    /// registered one whose selector matches with quality at least
    /// [`MatchQuality::CompatibleWithConversion`]. Returns a clone of the
    /// handler so it can be invoked outside the registry lock.
    pub fn resolve(&self, target: &MethodIdentity) -> Option<Handler> {
        let inner = self.inner.lock();
        inner
            .providers
            .iter()
            .rev()
            .find(|provider| {
                provider.selector.matches(target)
                    && provider.handler.quality_for(target) != MatchQuality::Incompatible
            })
            .map(|provider| provider.handler.clone())
    }

    /// Remove one registration; returns whether the handle was present
    pub fn remove(&self, handle: RegistrationHandle) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.providers.len();
        inner.providers.retain(|provider| provider.handle != handle);
        inner.providers.len() != before
    }

    /// Remove every registration. Callers clear between test cases; the
    /// registry itself enforces no isolation.
    pub fn clear(&self) {
        self.inner.lock().providers.clear();
    }

    /// Number of live registrations
    pub fn len(&self) -> usize {
        self.inner.lock().providers.len()
    }

    /// Whether the registry has no registrations
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deflect_bytecode::TypeSig;

    fn write_line() -> MethodIdentity {
        MethodIdentity::static_method("Console", "write_line", vec![TypeSig::Str], TypeSig::Void)
    }

    fn null_handler() -> Handler {
        Handler::raw(|_| Ok(Value::Null))
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = InterceptionRegistry::new();
        registry
            .register(CallSelector::exact(write_line()), null_handler())
            .unwrap();

        assert!(registry.resolve(&write_line()).is_some());
        let other = MethodIdentity::static_method("Console", "write", vec![], TypeSig::Void);
        assert!(registry.resolve(&other).is_none());
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = InterceptionRegistry::new();
        registry
            .register(
                CallSelector::exact(write_line()),
                Handler::raw(|_| Ok(Value::I32(1))),
            )
            .unwrap();
        let second = registry
            .register(
                CallSelector::exact(write_line()),
                Handler::raw(|_| Ok(Value::I32(2))),
            )
            .unwrap();

        let invocation = Invocation {
            target: write_line(),
            receiver: None,
            args: vec![],
        };
        let handler = registry.resolve(&write_line()).unwrap();
        assert_eq!(handler.invoke(&invocation).unwrap(), Value::I32(2));

        // Removing the most recent registration re-exposes the earlier one
        assert!(registry.remove(second));
        let handler = registry.resolve(&write_line()).unwrap();
        assert_eq!(handler.invoke(&invocation).unwrap(), Value::I32(1));
    }

    #[test]
    fn test_remove_unknown_handle() {
        let registry = InterceptionRegistry::new();
        let handle = registry
            .register(CallSelector::exact(write_line()), null_handler())
            .unwrap();
        assert!(registry.remove(handle));
        assert!(!registry.remove(handle));
    }

    #[test]
    fn test_clear_empties_registry() {
        let registry = InterceptionRegistry::new();
        registry
            .register(CallSelector::exact(write_line()), null_handler())
            .unwrap();
        registry
            .register(CallSelector::declaring_type("Console"), null_handler())
            .unwrap();
        assert_eq!(registry.len(), 2);

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.resolve(&write_line()).is_none());
    }

    #[test]
    fn test_typed_handler_validated_at_registration() {
        let registry = InterceptionRegistry::new();

        let good = Handler::typed(
            HandlerSignature::new(vec![TypeSig::Str], TypeSig::Void),
            |_| Ok(Value::Null),
        );
        assert!(registry
            .register(CallSelector::exact(write_line()), good)
            .is_ok());

        let wrong_arity = Handler::typed(
            HandlerSignature::new(vec![TypeSig::Str, TypeSig::I32], TypeSig::Void),
            |_| Ok(Value::Null),
        );
        let result = registry.register(CallSelector::exact(write_line()), wrong_arity);
        assert!(matches!(
            result,
            Err(RuntimeError::IncompatibleSignature { .. })
        ));
        // The failed attempt left no partial registration behind
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_typed_handler_rejected_under_broad_selector() {
        let registry = InterceptionRegistry::new();
        let typed = Handler::typed(
            HandlerSignature::new(vec![TypeSig::Str], TypeSig::Void),
            |_| Ok(Value::Null),
        );
        let result = registry.register(CallSelector::declaring_type("Console"), typed);
        assert!(matches!(
            result,
            Err(RuntimeError::IncompatibleSignature { .. })
        ));
    }

    #[test]
    fn test_raw_handler_allowed_under_predicate_selector() {
        let registry = InterceptionRegistry::new();
        registry
            .register(
                CallSelector::predicate(|id| id.member_name.starts_with("write")),
                null_handler(),
            )
            .unwrap();
        assert!(registry.resolve(&write_line()).is_some());
    }

    #[test]
    fn test_resolve_falls_through_non_matching_providers() {
        let registry = InterceptionRegistry::new();
        registry
            .register(
                CallSelector::member("Console", "write_line"),
                Handler::raw(|_| Ok(Value::I32(1))),
            )
            .unwrap();

        // More recent, but registered for a different overload only.
        let overload = MethodIdentity::static_method(
            "Console",
            "write_line",
            vec![TypeSig::Str, TypeSig::I32],
            TypeSig::Void,
        );
        registry
            .register(
                CallSelector::exact(overload),
                Handler::typed(
                    HandlerSignature::new(vec![TypeSig::Str, TypeSig::I32], TypeSig::Void),
                    |_| Ok(Value::I32(2)),
                ),
            )
            .unwrap();

        let handler = registry.resolve(&write_line()).unwrap();
        let invocation = Invocation {
            target: write_line(),
            receiver: None,
            args: vec![],
        };
        assert_eq!(handler.invoke(&invocation).unwrap(), Value::I32(1));
    }

    #[test]
    fn test_global_registry_serves_dispatch() {
        use crate::dispatch::RuntimeDispatcher;

        let target = MethodIdentity::static_method(
            "GlobalConsole",
            "write_line",
            vec![TypeSig::Str],
            TypeSig::Void,
        );
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = hits.clone();
        InterceptionRegistry::global()
            .register(
                CallSelector::exact(target.clone()),
                Handler::raw(move |_| {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(Value::Null)
                }),
            )
            .unwrap();

        let dispatcher = RuntimeDispatcher::new(InterceptionRegistry::global());
        dispatcher
            .dispatch(&target, None, vec![Value::Str("hi".to_string())])
            .unwrap();
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);

        // Clear at the boundary; the global registry enforces no isolation
        InterceptionRegistry::global().clear();
        assert!(InterceptionRegistry::global().resolve(&target).is_none());
    }

    #[test]
    fn test_concurrent_register_and_resolve() {
        let registry = Arc::new(InterceptionRegistry::new());
        let rounds = 100;

        let writer = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for i in 0..rounds {
                    registry
                        .register(
                            CallSelector::exact(write_line()),
                            Handler::raw(move |_| Ok(Value::I32(i))),
                        )
                        .unwrap();
                }
            })
        };
        let reader = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                let invocation = Invocation {
                    target: write_line(),
                    receiver: None,
                    args: vec![],
                };
                for _ in 0..rounds {
                    // Every observed snapshot is a fully registered provider
                    if let Some(handler) = registry.resolve(&write_line()) {
                        assert!(matches!(
                            handler.invoke(&invocation),
                            Ok(Value::I32(_))
                        ));
                    }
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(registry.len(), rounds as usize);
    }

    #[test]
    fn test_resolution_is_deterministic_for_equal_identities() {
        let registry = InterceptionRegistry::new();
        registry
            .register(
                CallSelector::member("Console", "write_line"),
                Handler::raw(|_| Ok(Value::I32(7))),
            )
            .unwrap();

        let a = write_line();
        let b = write_line();
        assert_eq!(a, b);

        let invocation = Invocation {
            target: a.clone(),
            receiver: None,
            args: vec![],
        };
        let via_a = registry.resolve(&a).unwrap().invoke(&invocation).unwrap();
        let via_b = registry.resolve(&b).unwrap().invoke(&invocation).unwrap();
        assert_eq!(via_a, via_b);
    }
}
