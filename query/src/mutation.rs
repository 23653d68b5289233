use std::{fmt, future::Future, rc::Rc};

use futures::future::{FutureExt, LocalBoxFuture};

use crate::{AsyncController, AsyncStatus, QueryClient, QueryError, QueryValue};

/// Undoes an optimistic cache write.
#[must_use = "a Rollback does nothing unless it is run"]
pub struct Rollback(Box<dyn FnOnce()>);

impl Rollback {
    /// Wraps the function that restores the previous cache contents.
    pub fn new(rollback: impl FnOnce() + 'static) -> Self {
        Self(Box::new(rollback))
    }

    /// A rollback that does nothing.
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    /// Chains another rollback, which runs after this one.
    pub fn then(self, next: Rollback) -> Self {
        Self::new(move || {
            self.run();
            next.run();
        })
    }

    /// Restores the snapshot.
    pub fn run(self) {
        (self.0)()
    }
}

impl Default for Rollback {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for Rollback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Rollback")
    }
}

type OnMutate<A> = Rc<dyn Fn(&QueryClient, &A) -> Rollback>;
type OnError<A, E> = Rc<dyn Fn(&QueryClient, &E, &A)>;
type OnSuccess<A, R> = Rc<dyn Fn(&QueryClient, &R, &A)>;
type OnSettled<A, R, E> = Rc<dyn Fn(&QueryClient, Result<&R, &E>, &A)>;

/// Lifecycle callbacks of a [`Mutation`].
pub struct MutationOptions<A, R, E> {
    on_mutate: Option<OnMutate<A>>,
    on_error: Option<OnError<A, E>>,
    on_success: Option<OnSuccess<A, R>>,
    on_settled: Option<OnSettled<A, R, E>>,
}

impl<A, R, E> MutationOptions<A, R, E> {
    /// Options without callbacks.
    pub fn new() -> Self {
        Self {
            on_mutate: None,
            on_error: None,
            on_success: None,
            on_settled: None,
        }
    }

    /// Runs before the mutation function. Write provisional values into the
    /// cache here and return how to undo them.
    pub fn on_mutate(self, on_mutate: impl Fn(&QueryClient, &A) -> Rollback + 'static) -> Self {
        Self {
            on_mutate: Some(Rc::new(on_mutate)),
            ..self
        }
    }

    /// Runs after a failed mutation, once the rollback is done.
    pub fn on_error(self, on_error: impl Fn(&QueryClient, &E, &A) + 'static) -> Self {
        Self {
            on_error: Some(Rc::new(on_error)),
            ..self
        }
    }

    /// Runs after a successful mutation.
    pub fn on_success(self, on_success: impl Fn(&QueryClient, &R, &A) + 'static) -> Self {
        Self {
            on_success: Some(Rc::new(on_success)),
            ..self
        }
    }

    /// Runs last, whatever the outcome.
    pub fn on_settled(
        self,
        on_settled: impl Fn(&QueryClient, Result<&R, &E>, &A) + 'static,
    ) -> Self {
        Self {
            on_settled: Some(Rc::new(on_settled)),
            ..self
        }
    }
}

impl<A, R, E> Default for MutationOptions<A, R, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, R, E> Clone for MutationOptions<A, R, E> {
    fn clone(&self) -> Self {
        Self {
            on_mutate: self.on_mutate.clone(),
            on_error: self.on_error.clone(),
            on_success: self.on_success.clone(),
            on_settled: self.on_settled.clone(),
        }
    }
}

/// Creates a [`Mutation`] that runs `mutation_fn` with the lifecycle of `options`.
///
/// ```
/// use bookshelf_query::*;
/// use futures::executor::{block_on, LocalPool};
///
/// let pool = LocalPool::new();
/// let client = QueryClient::new(pool.spawner());
/// client.set_query_data::<Vec<u32>, String>("numbers", vec![1]);
///
/// let add = create_mutation(
///     &client,
///     |number: u32| async move { Err::<u32, _>(format!("cannot add {number}")) },
///     MutationOptions::new().on_mutate(|client, number: &u32| {
///         let rollback = client.snapshot::<Vec<u32>, String>("numbers");
///         client.update_query_data_mut::<Vec<u32>, String>("numbers", |numbers| {
///             numbers.push(*number)
///         });
///         rollback
///     }),
/// );
///
/// let result = block_on(add.mutate(2));
///
/// assert!(result.is_err());
/// assert!(add.is_error());
/// assert_eq!(Some(vec![1]), client.get_query_data::<Vec<u32>, String>("numbers"));
/// ```
pub fn create_mutation<A, R, E, Fu>(
    client: &QueryClient,
    mutation_fn: impl Fn(A) -> Fu + 'static,
    options: MutationOptions<A, R, E>,
) -> Mutation<A, R, E>
where
    A: Clone + 'static,
    R: QueryValue,
    E: QueryError,
    Fu: Future<Output = Result<R, E>> + 'static,
{
    Mutation {
        client: client.clone(),
        mutation_fn: Rc::new(move |args| mutation_fn(args).boxed_local()),
        options,
        state: AsyncController::new(),
    }
}

/// A write against the backend with optimistic cache updates.
pub struct Mutation<A, R, E> {
    client: QueryClient,
    #[allow(clippy::type_complexity)]
    mutation_fn: Rc<dyn Fn(A) -> LocalBoxFuture<'static, Result<R, E>>>,
    options: MutationOptions<A, R, E>,
    state: AsyncController<R, E>,
}

impl<A, R, E> Clone for Mutation<A, R, E> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            mutation_fn: self.mutation_fn.clone(),
            options: self.options.clone(),
            state: self.state.clone(),
        }
    }
}

impl<A, R, E> Mutation<A, R, E>
where
    A: Clone + 'static,
    R: QueryValue,
    E: QueryError,
{
    /// Runs the mutation.
    ///
    /// `on_mutate` runs before this returns. The rest of the lifecycle runs
    /// when the returned future is awaited.
    pub fn mutate(&self, args: A) -> impl Future<Output = Result<R, E>> + 'static {
        let rollback = match &self.options.on_mutate {
            Some(on_mutate) => on_mutate(&self.client, &args),
            None => Rollback::noop(),
        };

        let request = self.state.run((self.mutation_fn)(args.clone()));
        let client = self.client.clone();
        let options = self.options.clone();

        async move {
            let result = request.await;
            match &result {
                Ok(data) => {
                    if let Some(on_success) = &options.on_success {
                        on_success(&client, data, &args);
                    }
                }
                Err(error) => {
                    tracing::debug!(?error, "mutation failed, rolling back");
                    rollback.run();
                    if let Some(on_error) = &options.on_error {
                        on_error(&client, error, &args);
                    }
                }
            }
            if let Some(on_settled) = &options.on_settled {
                on_settled(&client, result.as_ref(), &args);
            }
            result
        }
    }

    /// Forgets the outcome of the last mutation.
    pub fn reset(&self) {
        self.state.reset()
    }

    /// The status of the last mutation.
    pub fn status(&self) -> AsyncStatus {
        self.state.status()
    }

    /// The data of the last successful mutation.
    pub fn data(&self) -> Option<R> {
        self.state.data()
    }

    /// The error of the last failed mutation.
    pub fn error(&self) -> Option<E> {
        self.state.error()
    }

    /// Whether the mutation never ran or was reset.
    pub fn is_idle(&self) -> bool {
        self.state.is_idle()
    }

    /// Whether the mutation is in flight.
    pub fn is_loading(&self) -> bool {
        self.state.is_loading()
    }

    /// Whether the last mutation succeeded.
    pub fn is_success(&self) -> bool {
        self.state.is_success()
    }

    /// Whether the last mutation failed.
    pub fn is_error(&self) -> bool {
        self.state.is_error()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use futures::executor::{block_on, LocalPool};

    use super::*;

    fn client() -> QueryClient {
        QueryClient::new(LocalPool::new().spawner())
    }

    #[test]
    fn callbacks_run_in_order_on_success() {
        let client = client();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let log = |name: &'static str| {
            let calls = calls.clone();
            move || calls.borrow_mut().push(name)
        };

        let on_mutate = log("mutate");
        let on_success = log("success");
        let on_error = log("error");
        let on_settled = log("settled");

        let mutation = create_mutation(
            &client,
            |value: u32| async move { Ok::<_, ()>(value + 1) },
            MutationOptions::<u32, u32, ()>::new()
                .on_mutate(move |_, _| {
                    on_mutate();
                    Rollback::noop()
                })
                .on_success(move |_, data, args| {
                    assert_eq!((2, 1), (*data, *args));
                    on_success();
                })
                .on_error(move |_, _, _| on_error())
                .on_settled(move |_, result, _| {
                    assert_eq!(Ok(&2), result);
                    on_settled();
                }),
        );

        assert!(mutation.is_idle());
        assert_eq!(Ok(2), block_on(mutation.mutate(1)));
        assert_eq!(vec!["mutate", "success", "settled"], *calls.borrow());
        assert!(mutation.is_success());
        assert_eq!(Some(2), mutation.data());

        mutation.reset();
        assert!(mutation.is_idle());
    }

    #[test]
    fn rollback_runs_before_on_error() {
        let client = client();
        let order = Rc::new(RefCell::new(Vec::new()));
        client.set_query_data::<String, String>("title", "Dune".into());

        let mutation = create_mutation(
            &client,
            |_: String| async { Err::<String, _>("rejected".to_string()) },
            MutationOptions::<String, String, String>::new()
                .on_mutate({
                    let order = order.clone();
                    move |client, title: &String| {
                        let order = order.clone();
                        let rollback = client.snapshot::<String, String>("title");
                        client.set_query_data::<String, String>("title", title.clone());
                        rollback.then(Rollback::new(move || order.borrow_mut().push("rollback")))
                    }
                })
                .on_error({
                    let order = order.clone();
                    move |client, error, _| {
                        assert_eq!("rejected", error.as_str());
                        assert_eq!(
                            Some("Dune".to_string()),
                            client.get_query_data::<String, String>("title")
                        );
                        order.borrow_mut().push("error");
                    }
                }),
        );

        let pending = mutation.mutate("Emma".to_string());
        assert!(mutation.is_loading());
        assert_eq!(
            Some("Emma".to_string()),
            client.get_query_data::<String, String>("title")
        );

        assert_eq!(Err("rejected".to_string()), block_on(pending));
        assert_eq!(vec!["rollback", "error"], *order.borrow());
        assert_eq!(Some("rejected".to_string()), mutation.error());
    }
}
