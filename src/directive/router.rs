//! Thread-safe registry mapping directive identity to handlers.

use std::{collections::HashMap, error::Error, fmt, sync::Arc};

use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::{
    directive::handler::{BlockingPolicy, Directive, DirectiveHandler, ResultSink},
    id::NamespaceAndName,
};

/// Errors returned by batch (de)registration.
#[derive(Debug)]
#[non_exhaustive]
pub enum RouterError {
    /// `addDirectiveHandlers` was given an entry that collides with an
    /// existing registration. The whole batch was rejected.
    DuplicateRegistration {
        /// The colliding directive's namespace.
        namespace: String,
        /// The colliding directive's name.
        name: String,
    },
    /// `removeDirectiveHandlers` was given an entry that is missing, or
    /// whose `(handler, policy)` does not match the registered one. The
    /// whole batch was rejected.
    NotRegistered {
        /// The unmatched directive's namespace.
        namespace: String,
        /// The unmatched directive's name.
        name: String,
    },
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::DuplicateRegistration { namespace, name } => {
                write!(f, "{}.{} is already registered", namespace, name)
            },
            RouterError::NotRegistered { namespace, name } => {
                write!(f, "{}.{} is not registered with the given handler/policy", namespace, name)
            },
        }
    }
}

impl Error for RouterError {}

/// One `(namespace, name) -> (handler, policy)` binding, as supplied to
/// [`DirectiveRouter::add_directive_handlers`] /
/// [`DirectiveRouter::remove_directive_handlers`].
pub struct HandlerBinding {
    /// The directive identity this binding covers.
    pub key: NamespaceAndName,
    /// The handler bound to this identity.
    pub handler: Arc<dyn DirectiveHandler>,
    /// The blocking policy associated with this binding.
    pub policy: BlockingPolicy,
}

impl HandlerBinding {
    /// Builds a binding.
    pub fn new(
        key: NamespaceAndName,
        handler: Arc<dyn DirectiveHandler>,
        policy: BlockingPolicy,
    ) -> Self {
        Self { key, handler, policy }
    }
}

struct Registration {
    handler: Arc<dyn DirectiveHandler>,
    policy: BlockingPolicy,
}

fn handler_key(handler: &Arc<dyn DirectiveHandler>) -> usize {
    Arc::as_ptr(handler) as *const () as usize
}

/// A thread-safe registry mapping directive identity to `(handler, policy)`
/// pairs, reference-counting handler registrations so each handler is
/// notified of deregistration exactly once, when its last mapping is
/// removed.
#[derive(Default)]
pub struct DirectiveRouter {
    registry: Mutex<HashMap<NamespaceAndName, Registration>>,
    ref_counts: Mutex<HashMap<usize, (Arc<dyn DirectiveHandler>, u64)>>,
}

/// RAII guard expressing the router's "increment count, drop lock, call,
/// retake lock, decrement" discipline around a user handler call. Built by
/// incrementing the handler's reference count; dropped by decrementing it
/// and, if the count reaches zero, firing `onDeregistered`.
struct HandlerCallScope<'a> {
    router: &'a DirectiveRouter,
    handler: Arc<dyn DirectiveHandler>,
}

impl<'a> HandlerCallScope<'a> {
    fn new(router: &'a DirectiveRouter, handler: Arc<dyn DirectiveHandler>) -> Self {
        router.increment_handler_ref_count(&handler);
        Self { router, handler }
    }
}

impl Drop for HandlerCallScope<'_> {
    fn drop(&mut self) {
        self.router.decrement_handler_ref_count(&self.handler);
    }
}

impl DirectiveRouter {
    /// Builds an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically installs a batch of handler bindings. Rejects the whole
    /// batch if any entry collides with an existing registration, or if two
    /// entries within the batch itself share a `(namespace, name)` key.
    #[instrument(skip(self, config))]
    pub fn add_directive_handlers(&self, config: Vec<HandlerBinding>) -> Result<(), RouterError> {
        let mut registry = self.registry.lock();

        let mut seen = std::collections::HashSet::with_capacity(config.len());
        for binding in &config {
            if registry.contains_key(&binding.key) || !seen.insert(&binding.key) {
                warn!(key = %binding.key, "addDirectiveHandlers rejected: already registered");
                return Err(RouterError::DuplicateRegistration {
                    namespace: binding.key.namespace.clone(),
                    name: binding.key.name.clone(),
                });
            }
        }

        for binding in config {
            info!(key = %binding.key, policy = %binding.policy, "directive handler registered");
            self.increment_handler_ref_count(&binding.handler);
            registry.insert(binding.key, Registration {
                handler: binding.handler,
                policy: binding.policy,
            });
        }

        Ok(())
    }

    /// Atomically removes a batch of handler bindings. Rejects the whole
    /// batch if any entry is missing or its `(handler, policy)` does not
    /// match what is registered. Handlers whose reference count reaches
    /// zero are notified via `onDeregistered` after the registry lock is
    /// released.
    #[instrument(skip(self, config))]
    pub fn remove_directive_handlers(&self, config: &[HandlerBinding]) -> Result<(), RouterError> {
        let mut registry = self.registry.lock();

        for binding in config {
            match registry.get(&binding.key) {
                Some(existing)
                    if Arc::ptr_eq(&existing.handler, &binding.handler)
                        && existing.policy == binding.policy => {},
                _ => {
                    warn!(key = %binding.key, "removeDirectiveHandlers rejected: not found or mismatched");
                    return Err(RouterError::NotRegistered {
                        namespace: binding.key.namespace.clone(),
                        name: binding.key.name.clone(),
                    });
                },
            }
        }

        let mut released = Vec::new();
        for binding in config {
            registry.remove(&binding.key);
            info!(key = %binding.key, "directive handler deregistered");
            self.decrement_handler_ref_count_deferred(&binding.handler, &mut released);
        }
        drop(registry);

        for handler in released {
            info!("onDeregistered called");
            handler.on_deregistered();
        }

        Ok(())
    }

    /// Looks up and invokes `handleDirectiveImmediately` on the handler
    /// bound to `directive`. Returns `false` if no handler is registered.
    #[instrument(skip(self, directive))]
    pub async fn handle_directive_immediately(&self, directive: Arc<Directive>) -> bool {
        let Some((handler, _)) = self.lookup_locked(directive.namespace_and_name()) else {
            warn!(message_id = %directive.message_id, "handleDirectiveImmediately: no handler registered");
            return false;
        };
        let _scope = HandlerCallScope::new(self, handler.clone());
        handler.handle_directive_immediately(directive).await;
        true
    }

    /// Looks up and invokes `preHandleDirective` on the handler bound to
    /// `directive`. Returns `false` if no handler is registered.
    #[instrument(skip(self, directive, result))]
    pub async fn pre_handle_directive(
        &self,
        directive: Arc<Directive>,
        result: Arc<dyn ResultSink>,
    ) -> bool {
        let Some((handler, _)) = self.lookup_locked(directive.namespace_and_name()) else {
            warn!(message_id = %directive.message_id, "preHandleDirective: no handler registered");
            return false;
        };
        let _scope = HandlerCallScope::new(self, handler.clone());
        handler.pre_handle_directive(directive, result).await;
        true
    }

    /// Looks up and invokes `handleDirective` on the handler bound to
    /// `directive`. Returns the handler's blocking policy if it accepted
    /// the message id, or `None` if no handler is registered or the
    /// handler did not recognize the message id.
    ///
    /// A [`BlockingPolicy::None`] binding is unregistered the moment it is
    /// assigned to a directive, i.e. here, before the handler's
    /// `handleDirective` runs. The held [`HandlerCallScope`] keeps the
    /// handler's reference count above zero for the duration of the call,
    /// so `onDeregistered` — if this was the handler's last binding — only
    /// fires once the call returns, never while it is in progress.
    #[instrument(skip(self, directive))]
    pub async fn handle_directive(&self, directive: &Directive) -> Option<BlockingPolicy> {
        let key = directive.namespace_and_name();
        let (handler, policy) = self.lookup_locked(key)?;
        let _scope = HandlerCallScope::new(self, handler.clone());
        if matches!(policy, BlockingPolicy::None) {
            self.unregister_assigned_binding(key, &handler, policy);
        }
        let accepted = handler.handle_directive(&directive.message_id).await;
        if accepted {
            Some(policy)
        } else {
            warn!(
                message_id = %directive.message_id,
                "handleDirective returned false; message id not recognized"
            );
            None
        }
    }

    /// Removes `key`'s binding if it still matches `(handler, policy)`,
    /// decrementing the handler's reference count. Used to implement
    /// [`BlockingPolicy::None`]'s unregister-on-assignment contract.
    fn unregister_assigned_binding(&self, key: &NamespaceAndName, handler: &Arc<dyn DirectiveHandler>, policy: BlockingPolicy) {
        {
            let mut registry = self.registry.lock();
            match registry.get(key) {
                Some(existing) if Arc::ptr_eq(&existing.handler, handler) && existing.policy == policy => {
                    registry.remove(key);
                },
                _ => return,
            }
        }
        info!(key = %key, "directive handler unregistered on NONE-policy assignment");
        self.decrement_handler_ref_count(handler);
    }

    /// Looks up and invokes `cancelDirective` on the handler bound to
    /// `directive`. Returns `false` if no handler is registered.
    #[instrument(skip(self, directive))]
    pub async fn cancel_directive(&self, directive: &Directive) -> bool {
        let Some((handler, _)) = self.lookup_locked(directive.namespace_and_name()) else {
            warn!(message_id = %directive.message_id, "cancelDirective: no handler registered");
            return false;
        };
        let _scope = HandlerCallScope::new(self, handler.clone());
        handler.cancel_directive(&directive.message_id).await;
        true
    }

    fn lookup_locked(&self, key: &NamespaceAndName) -> Option<(Arc<dyn DirectiveHandler>, BlockingPolicy)> {
        self.registry
            .lock()
            .get(key)
            .map(|reg| (reg.handler.clone(), reg.policy))
    }

    fn increment_handler_ref_count(&self, handler: &Arc<dyn DirectiveHandler>) {
        let key = handler_key(handler);
        let mut counts = self.ref_counts.lock();
        let entry = counts.entry(key).or_insert_with(|| (handler.clone(), 0));
        entry.1 += 1;
    }

    fn decrement_handler_ref_count(&self, handler: &Arc<dyn DirectiveHandler>) {
        let key = handler_key(handler);
        let released = {
            let mut counts = self.ref_counts.lock();
            match counts.get_mut(&key) {
                Some(entry) => {
                    entry.1 -= 1;
                    if entry.1 == 0 {
                        counts.remove(&key).map(|(h, _)| h)
                    } else {
                        None
                    }
                },
                None => {
                    warn!("decrementHandlerReferenceCount: handler not found");
                    None
                },
            }
        };
        if let Some(handler) = released {
            info!("onDeregistered called");
            handler.on_deregistered();
        }
    }

    fn decrement_handler_ref_count_deferred(
        &self,
        handler: &Arc<dyn DirectiveHandler>,
        released: &mut Vec<Arc<dyn DirectiveHandler>>,
    ) {
        let key = handler_key(handler);
        let mut counts = self.ref_counts.lock();
        if let Some(entry) = counts.get_mut(&key) {
            entry.1 -= 1;
            if entry.1 == 0 {
                if let Some((h, _)) = counts.remove(&key) {
                    released.push(h);
                }
            }
        }
    }
}

impl fmt::Debug for DirectiveRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectiveRouter")
            .field("registered", &self.registry.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{directive::handler::Mediums, id::MessageId};

    #[derive(Default)]
    struct CountingHandler {
        deregistered: AtomicU64,
        handled: AtomicU64,
    }

    #[async_trait]
    impl DirectiveHandler for CountingHandler {
        async fn handle_directive_immediately(&self, _directive: Arc<Directive>) {}

        async fn pre_handle_directive(&self, _directive: Arc<Directive>, _result: Arc<dyn ResultSink>) {}

        async fn handle_directive(&self, _message_id: &MessageId) -> bool {
            self.handled.fetch_add(1, Ordering::SeqCst);
            true
        }

        async fn cancel_directive(&self, _message_id: &MessageId) {}

        fn on_deregistered(&self) {
            self.deregistered.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn key(ns: &str, name: &str) -> NamespaceAndName {
        NamespaceAndName::new(ns, name)
    }

    fn binding(
        ns: &str,
        name: &str,
        handler: &Arc<CountingHandler>,
        policy: BlockingPolicy,
    ) -> HandlerBinding {
        HandlerBinding::new(key(ns, name), handler.clone() as Arc<dyn DirectiveHandler>, policy)
    }

    #[test]
    fn duplicate_registration_rejects_whole_batch() {
        let router = DirectiveRouter::new();
        let handler = Arc::new(CountingHandler::default());
        let policy = BlockingPolicy::NonBlocking { mediums: Mediums::NONE };

        router
            .add_directive_handlers(vec![binding("ns", "a", &handler, policy)])
            .unwrap();

        let err = router
            .add_directive_handlers(vec![
                binding("ns", "b", &handler, policy),
                binding("ns", "a", &handler, policy),
            ])
            .unwrap_err();

        assert!(matches!(err, RouterError::DuplicateRegistration { .. }));
        // The colliding batch must not have partially applied: "ns.b" should
        // not be registered.
        assert!(router
            .remove_directive_handlers(&[binding("ns", "b", &handler, policy)])
            .is_err());
    }

    #[test]
    fn intra_batch_key_collision_rejects_whole_batch() {
        let router = DirectiveRouter::new();
        let first = Arc::new(CountingHandler::default());
        let second = Arc::new(CountingHandler::default());
        let policy = BlockingPolicy::NonBlocking { mediums: Mediums::NONE };

        // Two distinct handlers both claim "ns.a" within the same batch.
        let err = router
            .add_directive_handlers(vec![
                binding("ns", "a", &first, policy),
                binding("ns", "a", &second, policy),
            ])
            .unwrap_err();

        assert!(matches!(err, RouterError::DuplicateRegistration { .. }));
        // Neither handler may have been partially installed: an attempt to
        // remove either must fail as "not registered", and neither ref
        // count may have been left dangling.
        assert!(router
            .remove_directive_handlers(&[binding("ns", "a", &first, policy)])
            .is_err());
        assert!(router
            .remove_directive_handlers(&[binding("ns", "a", &second, policy)])
            .is_err());
    }

    #[test]
    fn deregistration_fires_exactly_once_when_refcount_hits_zero() {
        let router = DirectiveRouter::new();
        let handler = Arc::new(CountingHandler::default());
        let policy = BlockingPolicy::NonBlocking { mediums: Mediums::NONE };

        router
            .add_directive_handlers(vec![
                binding("ns", "a", &handler, policy),
                binding("ns", "b", &handler, policy),
            ])
            .unwrap();

        router
            .remove_directive_handlers(&[binding("ns", "a", &handler, policy)])
            .unwrap();
        assert_eq!(handler.deregistered.load(Ordering::SeqCst), 0);

        router
            .remove_directive_handlers(&[binding("ns", "b", &handler, policy)])
            .unwrap();
        assert_eq!(handler.deregistered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mismatched_removal_is_rejected() {
        let router = DirectiveRouter::new();
        let handler = Arc::new(CountingHandler::default());
        let other_policy = BlockingPolicy::Blocking { mediums: Mediums::NONE };
        let policy = BlockingPolicy::NonBlocking { mediums: Mediums::NONE };

        router
            .add_directive_handlers(vec![binding("ns", "a", &handler, policy)])
            .unwrap();

        let err = router
            .remove_directive_handlers(&[binding("ns", "a", &handler, other_policy)])
            .unwrap_err();
        assert!(matches!(err, RouterError::NotRegistered { .. }));

        let directive = Arc::new(Directive::new("m0", "ns", "a", ""));
        assert_eq!(router.handle_directive(&directive).await, Some(policy));
    }

    #[tokio::test]
    async fn none_policy_unregisters_on_assignment() {
        let router = DirectiveRouter::new();
        let handler = Arc::new(CountingHandler::default());

        router
            .add_directive_handlers(vec![binding("ns", "a", &handler, BlockingPolicy::None)])
            .unwrap();

        let directive = Arc::new(Directive::new("m0", "ns", "a", ""));
        assert_eq!(router.handle_directive(&directive).await, Some(BlockingPolicy::None));
        // The binding is gone the moment it was assigned: onDeregistered
        // fires once the call returns, and a second directive for the same
        // (namespace, name) finds no handler.
        assert_eq!(handler.deregistered.load(Ordering::SeqCst), 1);

        let directive2 = Arc::new(Directive::new("m1", "ns", "a", ""));
        assert_eq!(router.handle_directive(&directive2).await, None);
    }
}
