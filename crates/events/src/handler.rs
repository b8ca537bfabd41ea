use std::marker::PhantomData;
use std::sync::Arc;

/// Receives messages published on an [`EventBus`](crate::EventBus).
///
/// Handlers run synchronously inside `publish()`. A returned error aborts delivery of
/// the current message to the remaining subscribers and is handed back to the
/// publisher.
pub trait Subscriber<M>: Send + Sync {
    type Error;

    fn handle(&self, message: &M) -> Result<(), Self::Error>;
}

/// Adapter turning a closure into a [`Subscriber`].
pub struct FnSubscriber<F, E> {
    f: F,
    _error: PhantomData<fn() -> E>,
}

impl<F, E> FnSubscriber<F, E> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _error: PhantomData,
        }
    }
}

impl<F, E> core::fmt::Debug for FnSubscriber<F, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FnSubscriber").finish_non_exhaustive()
    }
}

impl<M, E, F> Subscriber<M> for FnSubscriber<F, E>
where
    F: Fn(&M) -> Result<(), E> + Send + Sync,
{
    type Error = E;

    fn handle(&self, message: &M) -> Result<(), E> {
        (self.f)(message)
    }
}

/// Box a closure as a shareable subscriber, ready for `EventBus::subscribe`.
pub fn subscriber_fn<M, E, F>(f: F) -> Arc<dyn Subscriber<M, Error = E>>
where
    M: 'static,
    E: 'static,
    F: Fn(&M) -> Result<(), E> + Send + Sync + 'static,
{
    Arc::new(FnSubscriber::new(f))
}
