use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use jararaca_api::RequestOverrides;

use super::args::mutation_args;
use super::decode;
use crate::cache::with_retry;
use crate::context::QueryContext;
use crate::controller::{Arity, Controller, MethodDef, MethodFuture, resolve_method};
use crate::error::{CoreError, SharedError};

type SuccessFn = Arc<dyn Fn(&Value, &Value) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&CoreError, &Value) + Send + Sync>;
type SettledFn = Arc<dyn Fn(Result<&Value, &CoreError>, &Value) + Send + Sync>;
type Runner = Arc<dyn Fn(Vec<Value>) -> MethodFuture + Send + Sync>;

// ── Options and state ────────────────────────────────────────────────

/// Retry policy and lifecycle callbacks of a mutation. Callbacks receive
/// the outcome and the payload the mutation was triggered with.
#[derive(Clone)]
pub struct MutationOptions {
    pub retry: u32,
    pub retry_delay: Duration,
    on_success: Option<SuccessFn>,
    on_error: Option<ErrorFn>,
    on_settled: Option<SettledFn>,
}

impl Default for MutationOptions {
    fn default() -> Self {
        Self {
            retry: 0,
            retry_delay: Duration::from_secs(1),
            on_success: None,
            on_error: None,
            on_settled: None,
        }
    }
}

impl fmt::Debug for MutationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationOptions")
            .field("retry", &self.retry)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

impl MutationOptions {
    #[must_use]
    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    #[must_use]
    pub fn on_success(mut self, f: impl Fn(&Value, &Value) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&CoreError, &Value) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_settled(
        mut self,
        f: impl Fn(Result<&Value, &CoreError>, &Value) + Send + Sync + 'static,
    ) -> Self {
        self.on_settled = Some(Arc::new(f));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub enum MutationState {
    #[default]
    Idle,
    Pending,
    Success(Value),
    Failed(SharedError),
}

impl MutationState {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Success(data) => Some(data),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&CoreError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

// ── ClassMutationHooks ───────────────────────────────────────────────

pub struct ClassMutationHooks<C> {
    hooks: BTreeMap<&'static str, MutationHook<C>>,
}

impl<C: Controller> ClassMutationHooks<C> {
    /// Fails with [`CoreError::UnknownMethod`] if any name is not in
    /// `C::methods()`.
    pub fn new(names: &[&str]) -> Result<Self, CoreError> {
        let table = C::methods();
        let hooks = names
            .iter()
            .map(|name| {
                let def = resolve_method(&table, name)?;
                Ok((def.name(), MutationHook { def }))
            })
            .collect::<Result<_, CoreError>>()?;
        Ok(Self { hooks })
    }

    pub fn get(&self, name: &str) -> Option<&MutationHook<C>> {
        self.hooks.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.hooks.keys().copied()
    }
}

pub struct MutationHook<C> {
    def: MethodDef<C>,
}

impl<C> Clone for MutationHook<C> {
    fn clone(&self) -> Self {
        Self {
            def: self.def.clone(),
        }
    }
}

impl<C: Controller> MutationHook<C> {
    pub fn name(&self) -> &'static str {
        self.def.name()
    }

    pub fn arity(&self) -> Arity {
        self.def.arity()
    }

    pub fn use_mutation(&self, ctx: &QueryContext, options: MutationOptions) -> Mutation {
        let factory = ctx.factory::<C>();
        let def = self.def.clone();
        let run: Runner = Arc::new(move |args: Vec<Value>| {
            def.invoke(factory.create(&RequestOverrides::default()), args)
        });
        let (state, _) = watch::channel(MutationState::Idle);
        Mutation {
            name: self.def.name(),
            arity: self.def.arity(),
            run,
            options,
            state: Arc::new(state),
        }
    }
}

// ── Mutation ─────────────────────────────────────────────────────────

/// A trigger for one controller method. Every `mutate` builds a fresh
/// controller instance; nothing is cached.
#[derive(Clone)]
pub struct Mutation {
    name: &'static str,
    arity: Arity,
    run: Runner,
    options: MutationOptions,
    state: Arc<watch::Sender<MutationState>>,
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl Mutation {
    /// Run the method with `payload`, spread or passed whole according to
    /// its arity.
    pub async fn mutate(&self, payload: Value) -> Result<Value, SharedError> {
        self.state.send_replace(MutationState::Pending);
        debug!(method = self.name, "mutation started");

        let outcome = match mutation_args(self.name, self.arity, payload.clone()) {
            Ok(args) => {
                let run = Arc::clone(&self.run);
                with_retry(
                    move || run(args.clone()),
                    self.options.retry,
                    self.options.retry_delay,
                    &CancellationToken::new(),
                )
                .await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(data) => {
                if let Some(on_success) = &self.options.on_success {
                    on_success(&data, &payload);
                }
                if let Some(on_settled) = &self.options.on_settled {
                    on_settled(Ok(&data), &payload);
                }
                self.state.send_replace(MutationState::Success(data.clone()));
                Ok(data)
            }
            Err(e) => {
                debug!(method = self.name, error = %e, "mutation failed");
                if let Some(on_error) = &self.options.on_error {
                    on_error(&e, &payload);
                }
                if let Some(on_settled) = &self.options.on_settled {
                    on_settled(Err(&e), &payload);
                }
                let error = Arc::new(e);
                self.state
                    .send_replace(MutationState::Failed(Arc::clone(&error)));
                Err(error)
            }
        }
    }

    /// [`mutate`](Self::mutate) decoded into `T`.
    pub async fn mutate_as<T: DeserializeOwned>(&self, payload: Value) -> Result<T, SharedError> {
        let value = self.mutate(payload).await?;
        decode(value).map_err(Arc::new)
    }

    pub fn state(&self) -> MutationState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MutationState> {
        self.state.subscribe()
    }

    pub fn reset(&self) {
        self.state.send_replace(MutationState::Idle);
    }
}
