//! Query capability registry
//!
//! Maps a capability type (usually a `dyn Trait`) to a factory closure and
//! caches one built instance per type. Registering a factory evicts the
//! cached instance for that type, so the next lookup builds a new one.
//!
//! Registration is meant to happen at startup. Calls are internally
//! serialised, but a factory swapped while other workers hold the old
//! instance does not affect those workers.

use crate::engine::PersistenceEngine;
use crate::query::{
    DefaultQueryInterface, DynamicQueryInterface, NativeSqlQueryInterface, QueryInterface,
    SqlQueryInterface,
};
use crate::session::SessionManager;
use crate::validation::SessionValidation;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// What a factory gets to build a capability from
#[derive(Clone)]
pub struct FactoryContext {
    pub engine: Arc<dyn PersistenceEngine>,
    pub sessions: Arc<SessionManager>,
    pub validation: Arc<SessionValidation>,
}

impl std::fmt::Debug for FactoryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryContext")
            .field("dialect", &self.engine.dialect())
            .finish_non_exhaustive()
    }
}

type ErasedInstance = Box<dyn Any + Send + Sync>;
type ErasedFactory = Box<dyn Fn(&FactoryContext) -> ErasedInstance + Send + Sync>;

struct Slot {
    name: &'static str,
    factory: ErasedFactory,
    cached: Option<ErasedInstance>,
}

pub struct QueryInterfaceRegistry {
    context: FactoryContext,
    slots: Mutex<HashMap<TypeId, Slot>>,
}

fn default_generic(cx: &FactoryContext) -> Arc<dyn QueryInterface> {
    Arc::new(DefaultQueryInterface::new(cx.validation.clone()))
}

fn default_dynamic(cx: &FactoryContext) -> Arc<dyn DynamicQueryInterface> {
    Arc::new(DefaultQueryInterface::new(cx.validation.clone()))
}

fn default_native(cx: &FactoryContext) -> Arc<dyn SqlQueryInterface> {
    Arc::new(NativeSqlQueryInterface::new(cx.validation.clone()))
}

impl QueryInterfaceRegistry {
    /// Registry with the generic, dynamic and native SQL capabilities
    /// preloaded
    pub fn new(context: FactoryContext) -> Self {
        let registry = Self::empty(context);
        registry.register_factory::<dyn QueryInterface, _>(default_generic);
        registry.register_factory::<dyn DynamicQueryInterface, _>(default_dynamic);
        registry.register_factory::<dyn SqlQueryInterface, _>(default_native);
        registry
    }

    /// Registry with nothing registered
    pub fn empty(context: FactoryContext) -> Self {
        Self {
            context,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &FactoryContext {
        &self.context
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<TypeId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Associate capability `C` with `factory`, evicting any cached instance
    pub fn register_factory<C, F>(&self, factory: F)
    where
        C: ?Sized + Send + Sync + 'static,
        F: Fn(&FactoryContext) -> Arc<C> + Send + Sync + 'static,
    {
        let erased: ErasedFactory = Box::new(move |cx: &FactoryContext| Box::new(factory(cx)) as ErasedInstance);
        let replaced = self
            .slots()
            .insert(
                TypeId::of::<C>(),
                Slot {
                    name: type_name::<C>(),
                    factory: erased,
                    cached: None,
                },
            )
            .is_some_and(|old| old.cached.is_some());
        tracing::debug!(
            component = module_path!(),
            op = "register_factory",
            capability = type_name::<C>(),
            evicted = replaced,
        );
    }

    /// The instance for capability `C`, built on first use
    ///
    /// Returns `None` and logs an error if no factory was registered.
    pub fn get_interface<C>(&self) -> Option<Arc<C>>
    where
        C: ?Sized + Send + Sync + 'static,
    {
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(&TypeId::of::<C>()) else {
            tracing::error!(
                component = module_path!(),
                op = "get_interface",
                capability = type_name::<C>(),
                err_code = "ERR_UNKNOWN_CAPABILITY",
                "no factory registered for capability"
            );
            return None;
        };
        if slot.cached.is_none() {
            slot.cached = Some((slot.factory)(&self.context));
        }
        let typed = slot
            .cached
            .as_ref()
            .and_then(|instance| instance.downcast_ref::<Arc<C>>())
            .cloned();
        if typed.is_none() {
            tracing::error!(
                component = module_path!(),
                op = "get_interface",
                capability = slot.name,
                err_code = "ERR_INTERNAL",
                "cached instance has an unexpected type"
            );
        }
        typed
    }

    pub fn is_registered<C: ?Sized + 'static>(&self) -> bool {
        self.slots().contains_key(&TypeId::of::<C>())
    }

    /// Names of all registered capability types
    pub fn capabilities(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.slots().values().map(|s| s.name).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for QueryInterfaceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryInterfaceRegistry")
            .field("capabilities", &self.capabilities())
            .finish()
    }
}
