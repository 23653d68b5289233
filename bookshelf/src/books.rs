use bookshelf_query::{QueryClient, QueryKey, QueryResult};

use crate::{
    api_client::{ApiClient, RequestConfig},
    error::ClientError,
    model::{Book, BookResponse, BooksResponse, User},
};

/// Query name of single books.
pub const BOOK_KEY: &str = "book";
/// Query name of catalog searches.
pub const BOOK_SEARCH_KEY: &str = "bookSearch";

/// Cache key of one book.
pub fn book_key(book_id: &str) -> QueryKey {
    QueryKey::new(BOOK_KEY).with("bookId", book_id)
}

/// Cache key of one search.
pub fn book_search_key(query: &str) -> QueryKey {
    QueryKey::new(BOOK_SEARCH_KEY).with("query", query)
}

/// Observes one book. Reads [`Book::loading`] until it is loaded.
pub fn use_book(api: &ApiClient, book_id: &str, user: &User) -> QueryResult<Book, ClientError> {
    let fetcher = {
        let api = api.clone();
        let endpoint = format!("books/{book_id}");
        let token = user.token.clone();
        move || {
            let api = api.clone();
            let endpoint = endpoint.clone();
            let config = RequestConfig::new().token(token.clone());
            async move {
                let BookResponse { book } = api.request(&endpoint, config).await?;
                Ok::<_, ClientError>(book)
            }
        }
    };

    api.queries().use_query(
        book_key(book_id),
        fetcher,
        api.queries()
            .query_options()
            .set_default_value(Some(Book::loading())),
    )
}

/// Observes a catalog search. Reads ten placeholders until results arrive.
///
/// Every book of the result is also stored under its own key, so opening one
/// does not fetch it again.
pub fn use_book_search(
    api: &ApiClient,
    query: &str,
    user: &User,
) -> QueryResult<Vec<Book>, ClientError> {
    api.queries().use_query(
        book_search_key(query),
        search_fetcher(api, query, user),
        api.queries()
            .query_options()
            .set_default_value(Some(Book::loading_list())),
    )
}

fn search_fetcher(
    api: &ApiClient,
    query: &str,
    user: &User,
) -> impl Fn() -> futures::future::LocalBoxFuture<'static, Result<Vec<Book>, ClientError>> + 'static {
    use futures::FutureExt;

    let api = api.clone();
    let endpoint = format!("books?query={}", encode_query(query));
    let token = user.token.clone();
    move || {
        let api = api.clone();
        let endpoint = endpoint.clone();
        let config = RequestConfig::new().token(token.clone());
        async move {
            let BooksResponse { books } = api.request(&endpoint, config).await?;
            for book in &books {
                set_query_data_for_book(api.queries(), book.clone());
            }
            Ok::<_, ClientError>(books)
        }
        .boxed_local()
    }
}

fn encode_query(query: &str) -> String {
    url::form_urlencoded::byte_serialize(query.as_bytes()).collect()
}

/// Drops the cached empty search and fetches it again for `user`.
///
/// Run when the signed-in user changes so the landing search shows their data.
pub fn refetch_book_search_query(
    api: &ApiClient,
    user: &User,
) -> impl std::future::Future<Output = ()> + 'static {
    api.queries()
        .evict_query::<Vec<Book>, ClientError>(book_search_key(""));
    api.queries()
        .prefetch_query(book_search_key(""), search_fetcher(api, "", user))
}

/// Stores `book` under its own key.
pub fn set_query_data_for_book(queries: &QueryClient, book: Book) {
    let key = book_key(&book.id);
    queries.set_query_data::<Book, ClientError>(key, book);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys() {
        assert_eq!(Some("b1"), book_key("b1").param("bookId"));
        assert_eq!(BOOK_SEARCH_KEY, book_search_key("").name());
        assert_ne!(book_search_key(""), book_search_key("dune"));
    }

    #[test]
    fn search_terms_are_encoded() {
        assert_eq!("", encode_query(""));
        assert_eq!("the+hobbit%26co", encode_query("the hobbit&co"));
    }
}
