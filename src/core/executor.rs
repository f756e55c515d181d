//! Run execution traits.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use async_trait::async_trait;

use crate::core::error::ComputationError;
use crate::core::run::RunUnit;

/// Executes the user computation for a single run.
///
/// Implementations must be idempotent for a given run: a run that completed but whose ledger
/// record was lost is executed again on resume.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use sweep_scheduler::core::{ComputationError, RunExecutor, RunUnit};
///
/// #[derive(Clone)]
/// struct Square;
///
/// #[async_trait]
/// impl RunExecutor<f64> for Square {
///     async fn execute(&self, unit: &RunUnit) -> Result<f64, ComputationError> {
///         let x = unit
///             .param("x")
///             .and_then(serde_json::Value::as_f64)
///             .ok_or_else(|| ComputationError::failed("missing x"))?;
///         Ok(x * x)
///     }
/// }
/// ```
#[async_trait]
pub trait RunExecutor<R>: Send + Sync + Clone + 'static
where
    R: Send + Sync + 'static,
{
    /// Run the computation for `unit`.
    ///
    /// # Errors
    ///
    /// Any [`ComputationError`] marks the run `Failed`; the sweep continues.
    async fn execute(&self, unit: &RunUnit) -> Result<R, ComputationError>;
}

/// Adapter turning a synchronous closure into a [`RunExecutor`].
pub struct FnExecutor<F, R> {
    func: F,
    _result: PhantomData<fn() -> R>,
}

impl<F: Clone, R> Clone for FnExecutor<F, R> {
    fn clone(&self) -> Self {
        Self {
            func: self.func.clone(),
            _result: PhantomData,
        }
    }
}

/// Wrap a closure as an executor.
pub const fn from_fn<F, R>(func: F) -> FnExecutor<F, R>
where
    F: Fn(&RunUnit) -> Result<R, ComputationError> + Send + Sync + Clone + 'static,
{
    FnExecutor {
        func,
        _result: PhantomData,
    }
}

#[async_trait]
impl<F, R> RunExecutor<R> for FnExecutor<F, R>
where
    F: Fn(&RunUnit) -> Result<R, ComputationError> + Send + Sync + Clone + 'static,
    R: Send + Sync + 'static,
{
    async fn execute(&self, unit: &RunUnit) -> Result<R, ComputationError> {
        (self.func)(unit)
    }
}

/// Boxed future returned by [`AsyncFnExecutor`] closures.
pub type RunFuture<R> = Pin<Box<dyn Future<Output = Result<R, ComputationError>> + Send>>;

/// Adapter for closures returning a boxed future. The unit is passed by value so the future
/// can own it.
pub struct AsyncFnExecutor<F, R> {
    func: F,
    _result: PhantomData<fn() -> R>,
}

impl<F: Clone, R> Clone for AsyncFnExecutor<F, R> {
    fn clone(&self) -> Self {
        Self {
            func: self.func.clone(),
            _result: PhantomData,
        }
    }
}

/// Wrap an async closure as an executor.
pub const fn from_async_fn<F, R>(func: F) -> AsyncFnExecutor<F, R>
where
    F: Fn(RunUnit) -> RunFuture<R> + Send + Sync + Clone + 'static,
{
    AsyncFnExecutor {
        func,
        _result: PhantomData,
    }
}

#[async_trait]
impl<F, R> RunExecutor<R> for AsyncFnExecutor<F, R>
where
    F: Fn(RunUnit) -> RunFuture<R> + Send + Sync + Clone + 'static,
    R: Send + Sync + 'static,
{
    async fn execute(&self, unit: &RunUnit) -> Result<R, ComputationError> {
        (self.func)(unit.clone()).await
    }
}

/// Callback invoked for every completed run.
///
/// Called from the scheduler thread, either right after each completion or in index order
/// once the sweep has drained.
pub trait PostProcessor<R>: Send {
    /// Handle one completed run.
    fn on_completed(&mut self, unit: &RunUnit, result: &R);
}

impl<R, F> PostProcessor<R> for F
where
    F: FnMut(&RunUnit, &R) + Send,
{
    fn on_completed(&mut self, unit: &RunUnit, result: &R) {
        self(unit, result);
    }
}
