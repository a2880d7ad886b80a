//! Children resolvers.
//!
//! A [`ChildrenResolver`] turns an item into its children. Five forms are
//! supported, and all of them funnel into the same internal contract: a
//! cancellable future producing either "no children" (the item is a leaf),
//! a fixed list of items, or a live source that keeps updating.
//!
//! | Form | Produces |
//! |------|----------|
//! | [`Sync`](ChildrenResolver::Sync) | an immediate list |
//! | [`Async`](ChildrenResolver::Async) | a list, eventually |
//! | [`Stream`](ChildrenResolver::Stream) | items one by one until the stream ends |
//! | [`Observable`](ChildrenResolver::Observable) | full snapshots pushed over time |
//! | [`Changeset`](ChildrenResolver::Changeset) | incremental changes to a collection |

use std::future::Future;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use futures_util::stream::{BoxStream, Stream, StreamExt};
use horizon_arbor_core::CancellationToken;
use horizon_arbor_core::logging::targets;

use super::error::{LoadError, ResolveError};
use super::live::{ChildrenFeed, LiveChildren, LiveSource};

/// Synchronous resolver function.
pub type SyncResolveFn<T> = Arc<dyn Fn(&T) -> Option<Vec<T>> + Send + Sync>;

/// Asynchronous resolver function.
pub type AsyncResolveFn<T> = Arc<
    dyn Fn(T, CancellationToken) -> BoxFuture<'static, Result<Option<Vec<T>>, ResolveError>>
        + Send
        + Sync,
>;

/// Streaming resolver function.
pub type StreamResolveFn<T> = Arc<
    dyn Fn(T, CancellationToken) -> Option<BoxStream<'static, Result<T, ResolveError>>>
        + Send
        + Sync,
>;

/// Snapshot-pushing resolver function.
pub type FeedResolveFn<T> = Arc<dyn Fn(&T) -> Option<ChildrenFeed<T>> + Send + Sync>;

/// Changeset resolver function.
pub type ChangesetResolveFn<T> = Arc<dyn Fn(&T) -> Option<LiveChildren<T>> + Send + Sync>;

/// What a resolution produced.
#[derive(Clone)]
pub(crate) enum Resolved<T> {
    Items(Vec<T>),
    Live(LiveSource<T>),
}

/// `Ok(None)` means the item has no children.
pub(crate) type LoadResult<T> = Result<Option<Resolved<T>>, LoadError>;

/// A load future that several expanders can await together.
pub(crate) type SharedLoad<T> = Shared<BoxFuture<'static, LoadResult<T>>>;

/// The kind of a [`ChildrenResolver`], for logging and inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverKind {
    Sync,
    Async,
    Stream,
    Observable,
    Changeset,
}

/// Produces the children of an item.
///
/// Returning `None` from any form marks the item as a leaf; an empty list
/// marks it as loaded with no children.
pub enum ChildrenResolver<T> {
    Sync(SyncResolveFn<T>),
    Async(AsyncResolveFn<T>),
    Stream(StreamResolveFn<T>),
    Observable(FeedResolveFn<T>),
    Changeset(ChangesetResolveFn<T>),
}

impl<T> Clone for ChildrenResolver<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(f) => Self::Sync(f.clone()),
            Self::Async(f) => Self::Async(f.clone()),
            Self::Stream(f) => Self::Stream(f.clone()),
            Self::Observable(f) => Self::Observable(f.clone()),
            Self::Changeset(f) => Self::Changeset(f.clone()),
        }
    }
}

impl<T> std::fmt::Debug for ChildrenResolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ChildrenResolver").field(&self.kind()).finish()
    }
}

impl<T> ChildrenResolver<T> {
    /// Which form this resolver takes.
    pub fn kind(&self) -> ResolverKind {
        match self {
            Self::Sync(_) => ResolverKind::Sync,
            Self::Async(_) => ResolverKind::Async,
            Self::Stream(_) => ResolverKind::Stream,
            Self::Observable(_) => ResolverKind::Observable,
            Self::Changeset(_) => ResolverKind::Changeset,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> ChildrenResolver<T> {
    /// Resolve children synchronously.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&T) -> Option<Vec<T>> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Resolve children with a future.
    ///
    /// The token is cancelled when the model no longer wants the result.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(T, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Vec<T>>, ResolveError>> + Send + 'static,
    {
        Self::Async(Arc::new(move |item, token| f(item, token).boxed()))
    }

    /// Resolve children as a stream, collected until it ends.
    pub fn from_stream<F, S>(f: F) -> Self
    where
        F: Fn(T, CancellationToken) -> Option<S> + Send + Sync + 'static,
        S: Stream<Item = Result<T, ResolveError>> + Send + 'static,
    {
        Self::Stream(Arc::new(move |item, token| f(item, token).map(|stream| stream.boxed())))
    }

    /// Resolve children to a feed of full snapshots.
    pub fn from_feed<F>(f: F) -> Self
    where
        F: Fn(&T) -> Option<ChildrenFeed<T>> + Send + Sync + 'static,
    {
        Self::Observable(Arc::new(f))
    }

    /// Resolve children to a live collection.
    pub fn from_live<F>(f: F) -> Self
    where
        F: Fn(&T) -> Option<LiveChildren<T>> + Send + Sync + 'static,
    {
        Self::Changeset(Arc::new(f))
    }

    /// Start resolving the children of `item`.
    ///
    /// Synchronous forms run immediately; the returned future observes
    /// `token` and yields [`LoadError::Cancelled`] once it fires.
    pub(crate) fn resolve(
        &self,
        item: &T,
        token: CancellationToken,
    ) -> BoxFuture<'static, LoadResult<T>> {
        tracing::trace!(target: targets::RESOLVER, kind = ?self.kind(), "resolving children");

        let load: BoxFuture<'static, LoadResult<T>> = match self {
            Self::Sync(f) => future::ready(Ok(f(item).map(Resolved::Items))).boxed(),
            Self::Async(f) => f(item.clone(), token.clone())
                .map(|result| {
                    result
                        .map(|children| children.map(Resolved::Items))
                        .map_err(LoadError::from)
                })
                .boxed(),
            Self::Stream(f) => match f(item.clone(), token.clone()) {
                Some(stream) => collect_stream(stream, token.clone()).boxed(),
                None => future::ready(Ok(None)).boxed(),
            },
            Self::Observable(f) => future::ready(Ok(
                f(item).map(|feed| Resolved::Live(LiveSource::Feed(feed)))
            ))
            .boxed(),
            Self::Changeset(f) => future::ready(Ok(
                f(item).map(|children| Resolved::Live(LiveSource::Collection(children)))
            ))
            .boxed(),
        };

        async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(LoadError::Cancelled),
                result = load => result,
            }
        }
        .boxed()
    }
}

async fn collect_stream<T>(
    mut stream: BoxStream<'static, Result<T, ResolveError>>,
    token: CancellationToken,
) -> LoadResult<T> {
    let mut items = Vec::new();
    while let Some(next) = stream.next().await {
        if token.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        items.push(next?);
    }
    Ok(Some(Resolved::Items(items)))
}
