//! Storage binding of a root document and the uniform `Pending` result.
//!
//! A document loaded or inserted through a database carries a [`Binding`].
//! Nested items reach it through their root. The binding fixes the execution
//! model: a blocking collaborator yields [`Pending::Ready`] results, a
//! suspending one yields [`Pending::Suspended`] futures. State is only ever
//! touched after the remote call completes, so dropping a suspended future
//! leaves every document as it was.

use std::cell::RefCell;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use docmap_store::{
    AggregateOptions, AsyncCollaborator, BulkOp, BulkResult, Collaborator, Criteria, DeleteResult,
    Projection, Stage, UpdateOp, UpdateResult,
};
use docmap_types::{ObjectId, RawDoc};

use crate::cache::ReferenceCache;
use crate::error::{OdmError, OdmResult};

/// Boxed, non-`Send` future used by suspending operations.
pub type LocalFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Result of an operation that may need the collaborator.
///
/// With a blocking collaborator the work is already done and the result is
/// [`Pending::Ready`]; call [`Pending::wait`]. With a suspending collaborator
/// the result is [`Pending::Suspended`]; `.await` it. Both variants are
/// awaitable, so suspending callers never need to distinguish them.
pub enum Pending<'a, T> {
    Ready(OdmResult<T>),
    Suspended(LocalFuture<'a, OdmResult<T>>),
}

impl<'a, T: 'a> Pending<'a, T> {
    pub fn ready(value: T) -> Self {
        Self::Ready(Ok(value))
    }

    pub fn fail(error: OdmError) -> Self {
        Self::Ready(Err(error))
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Take the value of a blocking operation.
    ///
    /// Fails with a protocol error for a suspended operation; await those.
    pub fn wait(self) -> OdmResult<T> {
        match self {
            Self::Ready(result) => result,
            Self::Suspended(_) => Err(OdmError::Protocol(
                "operation is bound to a suspending collaborator; await it".into(),
            )),
        }
    }

    /// Transform the successful value once it is available.
    pub fn map<U: 'a>(self, f: impl FnOnce(T) -> OdmResult<U> + 'a) -> Pending<'a, U> {
        match self {
            Self::Ready(result) => Pending::Ready(result.and_then(f)),
            Self::Suspended(fut) => Pending::Suspended(Box::pin(async move { f(fut.await?) })),
        }
    }

    /// Chain a further operation that may itself need the collaborator.
    pub fn and_then<U: 'a>(self, f: impl FnOnce(T) -> Pending<'a, U> + 'a) -> Pending<'a, U> {
        match self {
            Self::Ready(Err(e)) => Pending::Ready(Err(e)),
            Self::Ready(Ok(value)) => f(value),
            Self::Suspended(fut) => Pending::Suspended(Box::pin(async move {
                let value = fut.await?;
                f(value).await
            })),
        }
    }
}

impl<'a, T: 'a> IntoFuture for Pending<'a, T> {
    type Output = OdmResult<T>;
    type IntoFuture = LocalFuture<'a, OdmResult<T>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Self::Ready(result) => Box::pin(std::future::ready(result)),
            Self::Suspended(fut) => fut,
        }
    }
}

impl<T> fmt::Debug for Pending<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(r) => write!(f, "Pending::Ready(ok={})", r.is_ok()),
            Self::Suspended(_) => f.write_str("Pending::Suspended"),
        }
    }
}

/// The collaborator a binding talks to.
#[derive(Clone)]
pub enum Backend {
    Blocking(Arc<dyn Collaborator>),
    Suspending(Arc<dyn AsyncCollaborator>),
}

impl Backend {
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocking(_))
    }

    pub fn find(
        &self,
        collection: String,
        criteria: Criteria,
        projection: Projection,
    ) -> Pending<'static, Vec<RawDoc>> {
        match self {
            Self::Blocking(c) => {
                Pending::Ready(c.find(&collection, &criteria, &projection).map_err(Into::into))
            }
            Self::Suspending(c) => {
                let c = Arc::clone(c);
                Pending::Suspended(Box::pin(async move {
                    c.find(&collection, &criteria, &projection)
                        .await
                        .map_err(Into::into)
                }))
            }
        }
    }

    pub fn find_one(
        &self,
        collection: String,
        criteria: Criteria,
        projection: Projection,
    ) -> Pending<'static, Option<RawDoc>> {
        match self {
            Self::Blocking(c) => Pending::Ready(
                c.find_one(&collection, &criteria, &projection)
                    .map_err(Into::into),
            ),
            Self::Suspending(c) => {
                let c = Arc::clone(c);
                Pending::Suspended(Box::pin(async move {
                    c.find_one(&collection, &criteria, &projection)
                        .await
                        .map_err(Into::into)
                }))
            }
        }
    }

    pub fn update_one(
        &self,
        collection: String,
        criteria: Criteria,
        ops: Vec<UpdateOp>,
    ) -> Pending<'static, UpdateResult> {
        match self {
            Self::Blocking(c) => {
                Pending::Ready(c.update_one(&collection, &criteria, &ops).map_err(Into::into))
            }
            Self::Suspending(c) => {
                let c = Arc::clone(c);
                Pending::Suspended(Box::pin(async move {
                    c.update_one(&collection, &criteria, &ops)
                        .await
                        .map_err(Into::into)
                }))
            }
        }
    }

    pub fn insert_one(&self, collection: String, doc: RawDoc) -> Pending<'static, ObjectId> {
        match self {
            Self::Blocking(c) => Pending::Ready(c.insert_one(&collection, doc).map_err(Into::into)),
            Self::Suspending(c) => {
                let c = Arc::clone(c);
                Pending::Suspended(Box::pin(async move {
                    c.insert_one(&collection, doc).await.map_err(Into::into)
                }))
            }
        }
    }

    pub fn delete_one(&self, collection: String, criteria: Criteria) -> Pending<'static, DeleteResult> {
        match self {
            Self::Blocking(c) => {
                Pending::Ready(c.delete_one(&collection, &criteria).map_err(Into::into))
            }
            Self::Suspending(c) => {
                let c = Arc::clone(c);
                Pending::Suspended(Box::pin(async move {
                    c.delete_one(&collection, &criteria).await.map_err(Into::into)
                }))
            }
        }
    }

    pub fn delete_many(
        &self,
        collection: String,
        criteria: Criteria,
    ) -> Pending<'static, DeleteResult> {
        match self {
            Self::Blocking(c) => {
                Pending::Ready(c.delete_many(&collection, &criteria).map_err(Into::into))
            }
            Self::Suspending(c) => {
                let c = Arc::clone(c);
                Pending::Suspended(Box::pin(async move {
                    c.delete_many(&collection, &criteria).await.map_err(Into::into)
                }))
            }
        }
    }

    pub fn count(&self, collection: String, criteria: Criteria) -> Pending<'static, u64> {
        match self {
            Self::Blocking(c) => Pending::Ready(c.count(&collection, &criteria).map_err(Into::into)),
            Self::Suspending(c) => {
                let c = Arc::clone(c);
                Pending::Suspended(Box::pin(async move {
                    c.count(&collection, &criteria).await.map_err(Into::into)
                }))
            }
        }
    }

    pub fn aggregate(
        &self,
        collection: String,
        pipeline: Vec<Stage>,
        options: AggregateOptions,
    ) -> Pending<'static, Vec<RawDoc>> {
        match self {
            Self::Blocking(c) => Pending::Ready(
                c.aggregate(&collection, &pipeline, &options)
                    .map_err(Into::into),
            ),
            Self::Suspending(c) => {
                let c = Arc::clone(c);
                Pending::Suspended(Box::pin(async move {
                    c.aggregate(&collection, &pipeline, &options)
                        .await
                        .map_err(Into::into)
                }))
            }
        }
    }

    pub fn bulk_submit(
        &self,
        collection: String,
        ops: Vec<BulkOp>,
        ordered: bool,
    ) -> Pending<'static, BulkResult> {
        match self {
            Self::Blocking(c) => Pending::Ready(
                c.bulk_submit(&collection, ops, ordered)
                    .map_err(Into::into),
            ),
            Self::Suspending(c) => {
                let c = Arc::clone(c);
                Pending::Suspended(Box::pin(async move {
                    c.bulk_submit(&collection, ops, ordered)
                        .await
                        .map_err(Into::into)
                }))
            }
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocking(_) => f.write_str("Backend::Blocking"),
            Self::Suspending(_) => f.write_str("Backend::Suspending"),
        }
    }
}

/// Storage binding carried by root documents.
///
/// `cache` is the reference dedup cache of the query set the document was
/// loaded through; documents loaded outside a query set have none.
#[derive(Clone, Debug)]
pub struct Binding {
    pub backend: Backend,
    pub cache: Option<Rc<RefCell<ReferenceCache>>>,
}

impl Binding {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Rc<RefCell<ReferenceCache>>) -> Self {
        self.cache = Some(cache);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_on_ready() {
        assert_eq!(Pending::ready(3).wait().unwrap(), 3);
    }

    #[test]
    fn wait_on_suspended_is_a_protocol_error() {
        let pending: Pending<'_, i32> = Pending::Suspended(Box::pin(async { Ok(1) }));
        assert!(matches!(pending.wait(), Err(OdmError::Protocol(_))));
    }

    #[test]
    fn map_and_then_on_ready() {
        let out = Pending::ready(2)
            .map(|v| Ok(v * 10))
            .and_then(|v| Pending::ready(v + 1))
            .wait()
            .unwrap();
        assert_eq!(out, 21);
    }

    #[test]
    fn map_skips_closure_on_error() {
        let out = Pending::<i32>::fail(OdmError::NotResolved)
            .map(|_| -> OdmResult<i32> { panic!("must not run") })
            .wait();
        assert!(matches!(out, Err(OdmError::NotResolved)));
    }

    #[tokio::test]
    async fn both_variants_are_awaitable() {
        assert_eq!(Pending::ready(5).await.unwrap(), 5);
        let suspended: Pending<'_, i32> = Pending::Suspended(Box::pin(async { Ok(6) }));
        let mapped = suspended.map(|v| Ok(v + 1));
        assert!(!mapped.is_ready());
        assert_eq!(mapped.await.unwrap(), 7);
    }
}
