use bookshelf_query::{create_mutation, Mutation, MutationOptions, QueryClient, QueryResult, Rollback};
use http::Method;

use crate::{
    api_client::{ApiClient, RequestConfig},
    books::set_query_data_for_book,
    error::ClientError,
    model::{
        DeleteResponse, ListItem, ListItemResponse, ListItemUpdate, ListItemsResponse, NewListItem,
        User,
    },
};

/// Query name of the reading list.
pub const LIST_ITEMS_KEY: &str = "list-items";

type ListItems = Vec<ListItem>;

/// Observes the reading list of `user`. Reads an empty list until it is loaded.
///
/// The books embedded in the items are stored under their own keys.
pub fn use_list_items(api: &ApiClient, user: &User) -> QueryResult<ListItems, ClientError> {
    let fetcher = {
        let api = api.clone();
        let token = user.token.clone();
        move || {
            let api = api.clone();
            let config = RequestConfig::new().token(token.clone());
            async move {
                let ListItemsResponse { list_items } = api.request(LIST_ITEMS_KEY, config).await?;
                seed_books(api.queries(), &list_items);
                Ok::<_, ClientError>(list_items)
            }
        }
    };

    api.queries().use_query(
        LIST_ITEMS_KEY,
        fetcher,
        api.queries().query_options().set_default_value(Some(Vec::new())),
    )
}

/// Stores the list and the books embedded in it.
pub(crate) fn seed_list_items(queries: &QueryClient, list_items: ListItems) {
    seed_books(queries, &list_items);
    queries.set_query_data::<ListItems, ClientError>(LIST_ITEMS_KEY, list_items);
}

fn seed_books(queries: &QueryClient, list_items: &[ListItem]) {
    for book in list_items.iter().filter_map(|item| item.book.clone()) {
        set_query_data_for_book(queries, book);
    }
}

/// The reading-list entry of one book, looked up in [`use_list_items`].
pub struct ListItemQuery {
    items: QueryResult<ListItems, ClientError>,
    book_id: String,
}

impl ListItemQuery {
    /// The entry, once the list is loaded and contains the book.
    pub fn list_item(&self) -> Option<ListItem> {
        self.items
            .data()
            .and_then(|items| items.into_iter().find(|item| item.book_id == self.book_id))
    }

    /// The whole list.
    pub fn items(&self) -> &QueryResult<ListItems, ClientError> {
        &self.items
    }
}

/// Observes the list-item of `book_id` in the reading list of `user`.
pub fn use_list_item(api: &ApiClient, user: &User, book_id: &str) -> ListItemQuery {
    ListItemQuery {
        items: use_list_items(api, user),
        book_id: book_id.to_string(),
    }
}

fn reconcile<A, R>(options: MutationOptions<A, R, ClientError>) -> MutationOptions<A, R, ClientError> {
    options.on_settled(|client, _, _| {
        client.invalidate_query::<ListItems, ClientError>(LIST_ITEMS_KEY);
    })
}

// Stops a running list fetch from overwriting the optimistic write, then applies it.
fn optimistic(client: &QueryClient, write: impl FnOnce(&mut ListItems)) -> Rollback {
    client.cancel_query::<ListItems, ClientError>(LIST_ITEMS_KEY);
    let rollback = client.snapshot::<ListItems, ClientError>(LIST_ITEMS_KEY);
    client.update_query_data_mut::<ListItems, ClientError>(LIST_ITEMS_KEY, write);
    rollback
}

/// Adds a book to the reading list.
pub fn use_create_list_item(api: &ApiClient, user: &User) -> Mutation<String, ListItem, ClientError> {
    let api = api.clone();
    let token = user.token.clone();
    let queries = api.queries().clone();

    create_mutation(
        &queries,
        move |book_id: String| {
            let api = api.clone();
            let token = token.clone();
            async move {
                let data = serde_json::to_value(NewListItem { book_id: &book_id })?;
                let config = RequestConfig::new().data(data).token(token);
                let ListItemResponse { list_item } = api.request(LIST_ITEMS_KEY, config).await?;
                Ok::<_, ClientError>(list_item)
            }
        },
        reconcile(MutationOptions::new().on_mutate(|client, _| {
            client.cancel_query::<ListItems, ClientError>(LIST_ITEMS_KEY);
            Rollback::noop()
        })),
    )
}

/// Changes fields of a list item. The cached list shows the change right away
/// and reverts if the backend rejects it.
pub fn use_update_list_item(
    api: &ApiClient,
    user: &User,
) -> Mutation<ListItemUpdate, ListItem, ClientError> {
    let api = api.clone();
    let token = user.token.clone();
    let queries = api.queries().clone();

    create_mutation(
        &queries,
        move |update: ListItemUpdate| {
            let api = api.clone();
            let token = token.clone();
            async move {
                let data = serde_json::to_value(&update)?;
                let config = RequestConfig::new()
                    .method(Method::PUT)
                    .data(data)
                    .token(token);
                let endpoint = format!("{LIST_ITEMS_KEY}/{}", update.id);
                let ListItemResponse { list_item } = api.request(&endpoint, config).await?;
                Ok::<_, ClientError>(list_item)
            }
        },
        reconcile(MutationOptions::new().on_mutate(|client, update: &ListItemUpdate| {
            optimistic(client, |items| {
                items
                    .iter_mut()
                    .filter(|item| item.id == update.id)
                    .for_each(|item| update.apply(item))
            })
        })),
    )
}

/// Removes a list item by id. The cached list drops it right away.
pub fn use_remove_list_item(
    api: &ApiClient,
    user: &User,
) -> Mutation<String, DeleteResponse, ClientError> {
    let api = api.clone();
    let token = user.token.clone();
    let queries = api.queries().clone();

    create_mutation(
        &queries,
        move |id: String| {
            let api = api.clone();
            let token = token.clone();
            async move {
                let config = RequestConfig::new().method(Method::DELETE).token(token);
                let endpoint = format!("{LIST_ITEMS_KEY}/{id}");
                api.request::<DeleteResponse>(&endpoint, config).await
            }
        },
        reconcile(MutationOptions::new().on_mutate(|client, id: &String| {
            optimistic(client, |items| items.retain(|item| &item.id != id))
        })),
    )
}
