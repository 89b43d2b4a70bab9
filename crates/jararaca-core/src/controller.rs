// ── Controllers and method tables ──
//
// A controller is a type that wraps an `HttpBackend` and exposes async
// methods. Hooks never call those methods directly: each controller lists
// them in a `MethodTable`, which records the method name, its declared
// arity, and a type-erased invoker taking JSON arguments.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use jararaca_api::{HttpBackend, RequestOverrides, ScopedBackend};

use crate::error::CoreError;

/// Future returned by a type-erased method call.
pub type MethodFuture = BoxFuture<'static, Result<Value, CoreError>>;

type Invoker<C> = Arc<dyn Fn(C, Vec<Value>) -> MethodFuture + Send + Sync>;

// ── Controller ───────────────────────────────────────────────────────

/// A class of backend operations.
///
/// A fresh instance is built for every hook invocation and moved into the
/// method call, so no instance state survives between calls.
pub trait Controller: Sized + Send + Sync + 'static {
    /// Class identifier used in cache keys.
    const NAME: &'static str;

    fn new(backend: Arc<dyn HttpBackend>) -> Self;

    fn methods() -> MethodTable<Self>;
}

// ── Arity ────────────────────────────────────────────────────────────

/// Number of positional parameters a method declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    /// A rest parameter; declares no fixed positions.
    Variadic,
}

impl Arity {
    /// The declared parameter count used by call-convention heuristics.
    pub fn declared(self) -> usize {
        match self {
            Self::Fixed(n) => n,
            Self::Variadic => 0,
        }
    }
}

/// Positional arguments decodable from a list of JSON values.
pub trait MethodArgs: Sized + Send + 'static {
    const ARITY: Arity;

    fn from_values(values: Vec<Value>) -> Result<Self, serde_json::Error>;
}

impl MethodArgs for () {
    const ARITY: Arity = Arity::Fixed(0);

    fn from_values(_values: Vec<Value>) -> Result<Self, serde_json::Error> {
        Ok(())
    }
}

/// Collects every supplied argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Rest<T>(pub Vec<T>);

impl<T: DeserializeOwned + Send + 'static> MethodArgs for Rest<T> {
    const ARITY: Arity = Arity::Variadic;

    fn from_values(values: Vec<Value>) -> Result<Self, serde_json::Error> {
        values
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Rest)
    }
}

// Missing trailing arguments decode from `null`, so `Option` parameters
// may be omitted; surplus arguments are ignored.
macro_rules! tuple_args {
    ($n:expr => $($t:ident),+) => {
        impl<$($t: DeserializeOwned + Send + 'static),+> MethodArgs for ($($t,)+) {
            const ARITY: Arity = Arity::Fixed($n);

            fn from_values(mut values: Vec<Value>) -> Result<Self, serde_json::Error> {
                values.resize($n, Value::Null);
                serde_json::from_value(Value::Array(values))
            }
        }
    };
}

tuple_args!(1 => A);
tuple_args!(2 => A, B);
tuple_args!(3 => A, B, C);
tuple_args!(4 => A, B, C, D);
tuple_args!(5 => A, B, C, D, E);
tuple_args!(6 => A, B, C, D, E, F);

// ── MethodTable ──────────────────────────────────────────────────────

/// One registered method.
pub struct MethodDef<C> {
    name: &'static str,
    arity: Arity,
    invoke: Invoker<C>,
}

impl<C> Clone for MethodDef<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            arity: self.arity,
            invoke: Arc::clone(&self.invoke),
        }
    }
}

impl<C> fmt::Debug for MethodDef<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDef")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

impl<C> MethodDef<C> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    /// Call the method on `instance` with JSON arguments.
    pub fn invoke(&self, instance: C, args: Vec<Value>) -> MethodFuture {
        (self.invoke)(instance, args)
    }
}

/// Name → method registry for a controller.
pub struct MethodTable<C> {
    methods: BTreeMap<&'static str, MethodDef<C>>,
}

impl<C> Default for MethodTable<C> {
    fn default() -> Self {
        Self {
            methods: BTreeMap::new(),
        }
    }
}

impl<C: Send + 'static> MethodTable<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`. The arity comes from the argument tuple type `A`.
    ///
    /// ```rust,ignore
    /// MethodTable::new()
    ///     .method("list", |c: Users, (): ()| async move { c.list().await })
    ///     .method("get", |c: Users, (id,): (u64,)| async move { c.get(id).await })
    /// ```
    pub fn method<A, F, Fut, R, E>(mut self, name: &'static str, f: F) -> Self
    where
        A: MethodArgs,
        F: Fn(C, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Serialize + 'static,
        E: Into<CoreError> + 'static,
    {
        let invoke: Invoker<C> = Arc::new(move |instance: C, values: Vec<Value>| {
            let args = match A::from_values(values) {
                Ok(args) => args,
                Err(e) => {
                    let err = CoreError::ArgumentDecode {
                        method: name.to_owned(),
                        message: e.to_string(),
                    };
                    return futures_util::future::ready(Err(err)).boxed();
                }
            };
            let call = f(instance, args);
            async move {
                let result = match call.await {
                    Ok(result) => result,
                    Err(e) => return Err(e.into()),
                };
                serde_json::to_value(result).map_err(|e| CoreError::ResultEncode {
                    method: name.to_owned(),
                    message: e.to_string(),
                })
            }
            .boxed()
        });

        self.methods.insert(
            name,
            MethodDef {
                name,
                arity: A::ARITY,
                invoke,
            },
        );
        self
    }

    pub fn get(&self, name: &str) -> Option<&MethodDef<C>> {
        self.methods.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.methods.keys().copied()
    }
}

/// Look up `name` on `C`, failing with [`CoreError::UnknownMethod`].
pub(crate) fn resolve_method<C: Controller>(
    table: &MethodTable<C>,
    name: &str,
) -> Result<MethodDef<C>, CoreError> {
    table
        .get(name)
        .cloned()
        .ok_or_else(|| CoreError::UnknownMethod {
            class: C::NAME,
            method: name.to_owned(),
        })
}

// ── ControllerFactory ────────────────────────────────────────────────

/// Builds fresh controller instances over a shared backend.
pub struct ControllerFactory<C> {
    backend: Arc<dyn HttpBackend>,
    defaults: RequestOverrides,
    _controller: PhantomData<fn() -> C>,
}

impl<C> Clone for ControllerFactory<C> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            defaults: self.defaults.clone(),
            _controller: PhantomData,
        }
    }
}

impl<C: Controller> ControllerFactory<C> {
    pub fn new(backend: Arc<dyn HttpBackend>, defaults: RequestOverrides) -> Self {
        Self {
            backend,
            defaults,
            _controller: PhantomData,
        }
    }

    /// A new instance whose requests carry `overrides` layered on the
    /// factory defaults.
    pub fn create(&self, overrides: &RequestOverrides) -> C {
        let scoped = ScopedBackend::new(Arc::clone(&self.backend), self.defaults.merge(overrides));
        C::new(Arc::new(scoped))
    }
}
