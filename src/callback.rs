//! Callbacks for hooks and tests.
//!
//! A [`Callback`] can settle in three ways:
//! - synchronously, by returning `()` or a `Result<(), E>`,
//! - asynchronously, by returning a [`BoxFuture`] of one of those,
//! - through an explicit completion handle, see [`Callback::with_done`].
//!
//! Plain closures turn into callbacks through [`IntoCallback`], so the DSL accepts
//! `|cx| ()`, `|cx| Ok::<(), String>(())` and `|cx| async move { .. }.boxed()` alike.

use std::{
    fmt::{self, Debug, Display},
    sync::Arc,
};

use futures::{FutureExt, future::BoxFuture};
use tokio::sync::oneshot;

use crate::outcome::{CallbackResult, UnitError};

/// How a callback invocation settles.
pub enum Settle {
    Ready(CallbackResult),
    Pending(BoxFuture<'static, CallbackResult>),
}

impl Debug for Settle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Self::Pending(_) => write!(f, "Pending(...)"),
        }
    }
}

/// Return types a callback may produce.
pub trait IntoSettle {
    fn into_settle(self) -> Settle;
}

impl IntoSettle for () {
    fn into_settle(self) -> Settle {
        Settle::Ready(().into())
    }
}

impl<E: Display> IntoSettle for Result<(), E> {
    fn into_settle(self) -> Settle {
        Settle::Ready(self.into())
    }
}

impl<T> IntoSettle for BoxFuture<'static, T>
where
    T: Into<CallbackResult> + 'static,
{
    fn into_settle(self) -> Settle {
        Settle::Pending(self.map(Into::into).boxed())
    }
}

type SettleFn<Cx> = dyn Fn(Cx) -> Settle + Send + Sync;
type DoneFn<Cx> = dyn Fn(Cx, Done) + Send + Sync;

/// A shareable hook or test body, called with its runtime context `Cx`.
#[non_exhaustive]
pub enum Callback<Cx> {
    Settle(Arc<SettleFn<Cx>>),
    Done(Arc<DoneFn<Cx>>),
}

impl<Cx> Clone for Callback<Cx> {
    fn clone(&self) -> Self {
        match self {
            Self::Settle(f) => Self::Settle(Arc::clone(f)),
            Self::Done(f) => Self::Done(Arc::clone(f)),
        }
    }
}

impl<Cx> Debug for Callback<Cx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Settle(_) => write!(f, "Settle(...)"),
            Self::Done(_) => write!(f, "Done(...)"),
        }
    }
}

impl<Cx> Default for Callback<Cx> {
    fn default() -> Self {
        Self::Settle(Arc::new(|_| Settle::Ready(().into())))
    }
}

impl<Cx> Callback<Cx> {
    pub fn new<F, T>(f: F) -> Self
    where
        F: Fn(Cx) -> T + Send + Sync + 'static,
        T: IntoSettle,
    {
        Self::Settle(Arc::new(move |cx| f(cx).into_settle()))
    }

    /// A callback that settles once the passed [`Done`] handle is completed.
    pub fn with_done<F>(f: F) -> Self
    where
        F: Fn(Cx, Done) + Send + Sync + 'static,
    {
        Self::Done(Arc::new(f))
    }
}

impl<Cx: Send + 'static> Callback<Cx> {
    /// Call the callback and return a future for its settled result.
    ///
    /// The callback itself is only called once the returned future is first polled.
    pub(crate) fn invoke(&self, cx: Cx) -> BoxFuture<'static, CallbackResult> {
        match self.clone() {
            Self::Settle(f) => async move {
                match f(cx) {
                    Settle::Ready(result) => result,
                    Settle::Pending(fut) => fut.await,
                }
            }
            .boxed(),
            Self::Done(f) => async move {
                let (tx, rx) = oneshot::channel();
                f(cx, Done(tx));
                rx.await
                    .unwrap_or(CallbackResult(Err(UnitError::Dropped)))
            }
            .boxed(),
        }
    }
}

/// Completion handle passed to callbacks built with [`Callback::with_done`].
#[derive(Debug)]
pub struct Done(oneshot::Sender<CallbackResult>);

impl Done {
    pub fn ok(self) {
        self.call(());
    }

    pub fn fail(self, err: impl Display) {
        self.call(CallbackResult(Err(UnitError::failed(err))));
    }

    pub fn call(self, result: impl Into<CallbackResult>) {
        // the unit may already have settled through a timeout
        let _ = self.0.send(result.into());
    }
}

/// Conversion into a [`Callback`].
///
/// `Marker` only exists to keep the closure impl apart from the identity impl.
pub trait IntoCallback<Cx, Marker> {
    fn into_callback(self) -> Callback<Cx>;
}

impl<Cx> IntoCallback<Cx, ()> for Callback<Cx> {
    fn into_callback(self) -> Callback<Cx> {
        self
    }
}

impl<Cx, F, T> IntoCallback<Cx, fn(Cx) -> T> for F
where
    F: Fn(Cx) -> T + Send + Sync + 'static,
    T: IntoSettle,
{
    fn into_callback(self) -> Callback<Cx> {
        Callback::new(self)
    }
}
