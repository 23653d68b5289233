use std::{
    cell::{Cell, RefCell},
    fmt,
    future::Future,
    rc::{Rc, Weak},
};

use crate::query_observer::{Listeners, Subscription};

/// Creates a controller for a single, independent asynchronous operation.
///
/// Shorthand for [`AsyncController::new`].
pub fn use_async<T, E>() -> AsyncController<T, E>
where
    T: 'static,
    E: 'static,
{
    AsyncController::new()
}

/// Status of an [`AsyncState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AsyncStatus {
    /// Nothing has run yet, or the controller was reset.
    Idle,
    /// An operation is in flight.
    Pending,
    /// The last operation succeeded.
    Resolved,
    /// The last operation failed.
    Rejected,
}

impl AsyncStatus {
    /// Lowercase name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            AsyncStatus::Idle => "idle",
            AsyncStatus::Pending => "pending",
            AsyncStatus::Resolved => "resolved",
            AsyncStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for AsyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of an asynchronous operation.
///
/// Data only exists once resolved and an error only once rejected.
#[derive(Clone, PartialEq, Eq)]
pub enum AsyncState<T, E> {
    /// Nothing has run yet.
    Idle,
    /// An operation is in flight.
    Pending,
    /// The operation produced a value.
    Resolved(T),
    /// The operation failed.
    Rejected(E),
}

impl<T, E> AsyncState<T, E> {
    /// The status of this state.
    pub fn status(&self) -> AsyncStatus {
        match self {
            AsyncState::Idle => AsyncStatus::Idle,
            AsyncState::Pending => AsyncStatus::Pending,
            AsyncState::Resolved(_) => AsyncStatus::Resolved,
            AsyncState::Rejected(_) => AsyncStatus::Rejected,
        }
    }

    /// The resolved value, if any.
    pub fn data(&self) -> Option<&T> {
        match self {
            AsyncState::Resolved(data) => Some(data),
            _ => None,
        }
    }

    /// The rejection, if any.
    pub fn error(&self) -> Option<&E> {
        match self {
            AsyncState::Rejected(error) => Some(error),
            _ => None,
        }
    }

    /// Whether nothing has run yet.
    pub fn is_idle(&self) -> bool {
        matches!(self, AsyncState::Idle)
    }

    /// Whether an operation is in flight.
    pub fn is_loading(&self) -> bool {
        matches!(self, AsyncState::Pending)
    }

    /// Whether the last operation resolved.
    pub fn is_success(&self) -> bool {
        matches!(self, AsyncState::Resolved(_))
    }

    /// Whether the last operation was rejected.
    pub fn is_error(&self) -> bool {
        matches!(self, AsyncState::Rejected(_))
    }
}

impl<T, E> Default for AsyncState<T, E> {
    fn default() -> Self {
        AsyncState::Idle
    }
}

impl<T, E> fmt::Debug for AsyncState<T, E>
where
    T: fmt::Debug,
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Pending => write!(f, "Pending"),
            Self::Resolved(data) => f.debug_tuple("Resolved").field(data).finish(),
            Self::Rejected(error) => f.debug_tuple("Rejected").field(error).finish(),
        }
    }
}

/// Tracks the lifecycle of one asynchronous operation at a time.
///
/// The controller is the "owning scope" of its state: once it is
/// [disposed](Self::dispose), or every handle to it has been dropped, operations
/// that settle afterwards are discarded without touching anything.
///
/// Only the most recent [`run`](Self::run) is tracked. Starting a new run, or
/// forcing the state with [`set_data`](Self::set_data),
/// [`set_error`](Self::set_error) or [`reset`](Self::reset), supersedes a pending
/// run: its eventual settlement is ignored.
///
/// ```
/// use bookshelf_query::{AsyncController, AsyncStatus};
/// use futures::executor::block_on;
///
/// let controller = AsyncController::<u32, String>::new();
/// assert_eq!(AsyncStatus::Idle, controller.status());
///
/// let request = controller.run(async { Ok(7) });
/// assert_eq!(AsyncStatus::Pending, controller.status());
///
/// assert_eq!(Ok(7), block_on(request));
/// assert_eq!(Some(7), controller.data());
/// ```
///
/// Passing something that is not a future is rejected at compile time:
///
/// ```compile_fail
/// use bookshelf_query::AsyncController;
///
/// let controller = AsyncController::<u32, String>::new();
/// let _ = controller.run(7);
/// ```
pub struct AsyncController<T, E> {
    inner: Rc<ControllerInner<T, E>>,
}

struct ControllerInner<T, E> {
    // Shared so readers and listeners can hold a snapshot without a borrow.
    state: RefCell<Rc<AsyncState<T, E>>>,
    generation: Cell<u64>,
    mounted: Cell<bool>,
    listeners: Listeners<AsyncState<T, E>>,
}

impl<T, E> Clone for AsyncController<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Default for AsyncController<T, E>
where
    T: 'static,
    E: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> AsyncController<T, E>
where
    T: 'static,
    E: 'static,
{
    /// Creates an idle controller.
    pub fn new() -> Self {
        Self::from_state(AsyncState::Idle)
    }

    /// Creates a controller starting from `initial`.
    pub fn from_state(initial: AsyncState<T, E>) -> Self {
        Self {
            inner: Rc::new(ControllerInner {
                state: RefCell::new(Rc::new(initial)),
                generation: Cell::new(0),
                mounted: Cell::new(true),
                listeners: Listeners::new(),
            }),
        }
    }

    /// Tracks `future`.
    ///
    /// The state becomes [`Pending`](AsyncState::Pending) right away. The
    /// returned future drives `future` to completion, records the outcome (if
    /// this run is still the current one and the controller is alive), and
    /// yields the outcome unchanged.
    pub fn run<F>(&self, future: F) -> impl Future<Output = Result<T, E>> + 'static
    where
        F: Future<Output = Result<T, E>> + 'static,
        T: Clone,
        E: Clone,
    {
        let generation = self.inner.supersede();
        self.inner.dispatch(AsyncState::Pending);

        let inner = Rc::downgrade(&self.inner);
        async move {
            let result = future.await;
            settle(&inner, generation, &result);
            result
        }
    }

    /// Forces a resolved state.
    pub fn set_data(&self, data: T) {
        self.inner.supersede();
        self.inner.dispatch(AsyncState::Resolved(data));
    }

    /// Forces a rejected state.
    pub fn set_error(&self, error: E) {
        self.inner.supersede();
        self.inner.dispatch(AsyncState::Rejected(error));
    }

    /// Returns to the idle state.
    pub fn reset(&self) {
        self.inner.supersede();
        self.inner.dispatch(AsyncState::Idle);
    }

    /// Tears the controller down. Nothing changes its state afterwards and all
    /// listeners are dropped.
    pub fn dispose(&self) {
        self.inner.mounted.set(false);
        self.inner.listeners.clear();
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        !self.inner.mounted.get()
    }

    /// Registers a listener invoked after every transition.
    pub fn subscribe(&self, listener: impl Fn(&AsyncState<T, E>) + 'static) -> Subscription {
        let key = self.inner.listeners.add(listener);
        let inner = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.listeners.remove(key);
            }
        })
    }

    /// Reads the current state without cloning it.
    pub fn with_state<R>(&self, func: impl FnOnce(&AsyncState<T, E>) -> R) -> R {
        let state = self.inner.snapshot();
        func(&*state)
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> AsyncState<T, E>
    where
        T: Clone,
        E: Clone,
    {
        self.with_state(Clone::clone)
    }

    /// Current status.
    pub fn status(&self) -> AsyncStatus {
        self.with_state(AsyncState::status)
    }

    /// Resolved value, if any.
    pub fn data(&self) -> Option<T>
    where
        T: Clone,
    {
        self.with_state(|state| state.data().cloned())
    }

    /// Rejection, if any.
    pub fn error(&self) -> Option<E>
    where
        E: Clone,
    {
        self.with_state(|state| state.error().cloned())
    }

    /// Whether nothing has run yet.
    pub fn is_idle(&self) -> bool {
        self.with_state(AsyncState::is_idle)
    }

    /// Whether an operation is in flight.
    pub fn is_loading(&self) -> bool {
        self.with_state(AsyncState::is_loading)
    }

    /// Whether the last operation resolved.
    pub fn is_success(&self) -> bool {
        self.with_state(AsyncState::is_success)
    }

    /// Whether the last operation was rejected.
    pub fn is_error(&self) -> bool {
        self.with_state(AsyncState::is_error)
    }
}

impl<T, E> ControllerInner<T, E> {
    fn supersede(&self) -> u64 {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        generation
    }

    fn dispatch(&self, state: AsyncState<T, E>) {
        if !self.mounted.get() {
            return;
        }
        let state = Rc::new(state);
        *self.state.try_borrow_mut().expect("dispatch borrow_mut") = state.clone();

        // Listeners may transition the controller again.
        self.listeners.notify(&state);
    }

    fn snapshot(&self) -> Rc<AsyncState<T, E>> {
        self.state.try_borrow().expect("snapshot borrow").clone()
    }
}

fn settle<T, E>(inner: &Weak<ControllerInner<T, E>>, generation: u64, result: &Result<T, E>)
where
    T: Clone,
    E: Clone,
{
    let Some(inner) = inner.upgrade() else {
        tracing::trace!("async operation settled after its controller was dropped");
        return;
    };
    if !inner.mounted.get() {
        tracing::trace!("async operation settled after its controller was disposed");
        return;
    }
    if inner.generation.get() != generation {
        tracing::trace!("discarding superseded async operation");
        return;
    }
    inner.dispatch(match result {
        Ok(data) => AsyncState::Resolved(data.clone()),
        Err(error) => AsyncState::Rejected(error.clone()),
    });
}
