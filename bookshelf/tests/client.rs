use std::{
    cell::{Cell, RefCell},
    collections::{BTreeSet, HashMap},
    rc::Rc,
};

use async_trait::async_trait;
use bookshelf::*;
use bookshelf_query::{cache_observer::CacheEvent, QueryClient, QueryState};
use chrono::{TimeZone, Utc};
use futures::{
    executor::{block_on, LocalPool},
    task::LocalSpawnExt,
};
use futures_channel::oneshot;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, Response};
use serde_json::{json, Value};

const API_URL: &str = "https://api.test";

struct Recorded {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Option<String>,
}

#[derive(Default)]
struct MockTransport {
    requests: RefCell<Vec<Recorded>>,
    routes: RefCell<HashMap<String, (u16, String)>>,
    gates: RefCell<HashMap<String, oneshot::Receiver<()>>>,
}

impl MockTransport {
    fn respond(&self, route: &str, status: u16, body: Value) {
        self.routes
            .borrow_mut()
            .insert(route.to_string(), (status, body.to_string()));
    }

    /// Holds responses to `route` until the returned sender fires.
    fn gate(&self, route: &str) -> oneshot::Sender<()> {
        let (sender, receiver) = oneshot::channel();
        self.gates.borrow_mut().insert(route.to_string(), receiver);
        sender
    }

    fn count(&self, route: &str) -> usize {
        self.requests
            .borrow()
            .iter()
            .filter(|request| format!("{} {}", request.method, request.path) == route)
            .count()
    }
}

#[async_trait(?Send)]
impl Transport for MockTransport {
    async fn send(&self, request: Request<Option<String>>) -> Result<Response<String>, ClientError> {
        let (parts, body) = request.into_parts();
        let uri = parts.uri.to_string();
        let path = uri.trim_start_matches(API_URL).trim_start_matches('/').to_string();
        let route = format!("{} {}", parts.method, path);

        self.requests.borrow_mut().push(Recorded {
            method: parts.method,
            path,
            headers: parts.headers,
            body,
        });

        let gate = self.gates.borrow_mut().remove(&route);
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        let (status, body) = self
            .routes
            .borrow()
            .get(&route)
            .cloned()
            .unwrap_or_else(|| (404, json!({"status": 404, "message": "not found"}).to_string()));
        Ok(Response::builder().status(status).body(body).unwrap())
    }
}

#[derive(Default)]
struct FakeAuth {
    token: RefCell<Option<String>>,
    logouts: Cell<usize>,
}

#[async_trait(?Send)]
impl AuthProvider for FakeAuth {
    async fn get_token(&self) -> Option<String> {
        self.token.borrow().clone()
    }

    async fn login(&self, credentials: &Credentials) -> Result<User, ClientError> {
        if credentials.password != "secret" {
            return Err(ClientError::Response {
                status: 400,
                body: ErrorBody::new("invalid username or password"),
            });
        }
        *self.token.borrow_mut() = Some("T".to_string());
        Ok(user())
    }

    async fn register(&self, credentials: &Credentials) -> Result<User, ClientError> {
        self.login(credentials).await
    }

    async fn logout(&self) {
        self.logouts.set(self.logouts.get() + 1);
        *self.token.borrow_mut() = None;
    }
}

struct Harness {
    pool: LocalPool,
    api: ApiClient,
    transport: Rc<MockTransport>,
    auth: Rc<FakeAuth>,
    cleared: Rc<Cell<usize>>,
}

fn harness() -> Harness {
    let pool = LocalPool::new();
    let transport = Rc::new(MockTransport::default());
    let auth = Rc::new(FakeAuth::default());
    let queries = QueryClient::new(pool.spawner());

    let cleared = Rc::new(Cell::new(0));
    queries.register_cache_observer({
        let cleared = cleared.clone();
        move |event: CacheEvent| {
            if event == CacheEvent::Cleared {
                cleared.set(cleared.get() + 1);
            }
        }
    });

    let api = ApiClient::new(
        Config::new(API_URL, "https://auth.test"),
        transport.clone(),
        auth.clone(),
        queries,
    );

    Harness {
        pool,
        api,
        transport,
        auth,
        cleared,
    }
}

fn user() -> User {
    User {
        id: "u1".to_string(),
        username: "alice".to_string(),
        token: "T".to_string(),
    }
}

fn book(id: &str) -> Book {
    Book {
        id: id.to_string(),
        title: format!("Title {id}"),
        author: "Author".to_string(),
        cover_image_url: "https://covers.test/1.png".to_string(),
        publisher: "Publisher".to_string(),
        synopsis: "Synopsis".to_string(),
        loading_book: false,
    }
}

fn list_item(id: &str, notes: &str) -> ListItem {
    ListItem {
        id: id.to_string(),
        book_id: format!("b{id}"),
        owner_id: "u1".to_string(),
        rating: None,
        notes: notes.to_string(),
        start_date: Utc.timestamp_millis_opt(0).unwrap(),
        finish_date: None,
        book: Some(book(&format!("b{id}"))),
    }
}

fn cached_list_items(api: &ApiClient) -> Option<Vec<ListItem>> {
    api.queries()
        .get_query_data::<Vec<ListItem>, ClientError>(LIST_ITEMS_KEY)
}

#[test]
fn get_without_data() {
    let h = harness();
    h.transport.respond("GET books/1", 200, json!({"book": book("1")}));

    let response: Value = block_on(h.api.request("books/1", RequestConfig::new())).unwrap();

    assert_eq!("1", response["book"]["id"]);
    let requests = h.transport.requests.borrow();
    assert_eq!(Method::GET, requests[0].method);
    assert_eq!(None, requests[0].body);
    assert!(requests[0].headers.get(header::CONTENT_TYPE).is_none());
    assert!(requests[0].headers.get(header::AUTHORIZATION).is_none());
}

#[test]
fn data_without_method_is_posted_as_json() {
    let h = harness();
    h.transport.respond("POST things", 200, json!({"ok": true}));

    let config = RequestConfig::new().data(json!({"a": 1})).token("T");
    let _: Value = block_on(h.api.request("things", config)).unwrap();

    let requests = h.transport.requests.borrow();
    assert_eq!(Method::POST, requests[0].method);
    assert_eq!(Some(r#"{"a":1}"#.to_string()), requests[0].body);
    assert_eq!("application/json", requests[0].headers[header::CONTENT_TYPE]);
    assert_eq!("Bearer T", requests[0].headers[header::AUTHORIZATION]);
}

#[test]
fn explicit_method_and_headers_win() {
    let h = harness();
    h.transport.respond("PUT things/1", 200, json!({}));

    let config = RequestConfig::new()
        .data(json!({"a": 1}))
        .method(Method::PUT)
        .header(header::CONTENT_TYPE, HeaderValue::from_static("application/merge-patch+json"))
        .header(HeaderName::from_static("x-trace"), HeaderValue::from_static("abc"));
    let _: Value = block_on(h.api.request("things/1", config)).unwrap();

    let requests = h.transport.requests.borrow();
    assert_eq!(Method::PUT, requests[0].method);
    assert_eq!(
        "application/merge-patch+json",
        requests[0].headers[header::CONTENT_TYPE]
    );
    assert_eq!("abc", requests[0].headers["x-trace"]);
}

#[test]
fn error_response_carries_the_body() {
    let h = harness();
    h.transport.respond(
        "GET books/2",
        400,
        json!({"status": 400, "message": "No book with the id of 2"}),
    );

    let error = block_on(h.api.request::<Value>("books/2", RequestConfig::new())).unwrap_err();

    assert_eq!(Some(400), error.status());
    assert_eq!("No book with the id of 2", error.body().unwrap().message);
    assert_eq!(0, h.auth.logouts.get());
    assert_eq!(0, h.cleared.get());
}

#[test]
fn unauthorized_logs_out_and_clears_the_cache() {
    let h = harness();
    h.api
        .queries()
        .set_query_data::<Vec<ListItem>, ClientError>(LIST_ITEMS_KEY, vec![list_item("1", "a")]);
    h.transport
        .respond("GET list-items", 401, json!({"message": "Please re-authenticate."}));

    let error = block_on(
        h.api
            .request::<Value>("list-items", RequestConfig::new().token("expired")),
    )
    .unwrap_err();

    assert_eq!(
        ClientError::Response {
            status: 401,
            body: ErrorBody::new("Please re-authenticate."),
        },
        error
    );
    assert_eq!(1, h.auth.logouts.get());
    assert_eq!(1, h.cleared.get());
    assert_eq!(None, cached_list_items(&h.api));
}

#[test]
fn failed_update_rolls_back_the_optimistic_write() {
    let mut h = harness();
    h.api
        .queries()
        .set_query_data::<Vec<ListItem>, ClientError>(LIST_ITEMS_KEY, vec![list_item("1", "a")]);
    h.transport
        .respond("PUT list-items/1", 500, json!({"status": 500, "message": "boom"}));
    let release = h.transport.gate("PUT list-items/1");

    let update = use_update_list_item(&h.api, &user());
    let outcome = Rc::new(RefCell::new(None));
    let pending = update.mutate(ListItemUpdate::new("1").notes("b"));
    h.pool
        .spawner()
        .spawn_local({
            let outcome = outcome.clone();
            async move { *outcome.borrow_mut() = Some(pending.await) }
        })
        .unwrap();

    h.pool.run_until_stalled();
    assert!(update.is_loading());
    assert_eq!(Some(vec![list_item("1", "b")]), cached_list_items(&h.api));
    let put = h.transport.requests.borrow().last().map(|r| r.body.clone());
    assert_eq!(Some(Some(r#"{"id":"1","notes":"b"}"#.to_string())), put);

    release.send(()).unwrap();
    h.pool.run_until_stalled();

    assert!(update.is_error());
    assert_eq!(Some(500), outcome.borrow().as_ref().unwrap().as_ref().unwrap_err().status());
    assert_eq!(Some(vec![list_item("1", "a")]), cached_list_items(&h.api));
}

#[test]
fn removal_is_optimistic_and_reconciled() {
    let mut h = harness();
    let items = vec![list_item("1", "a"), list_item("2", "b")];
    h.transport
        .respond("GET list-items", 200, json!({ "listItems": items }));
    h.transport
        .respond("DELETE list-items/1", 200, json!({"success": true}));

    let list = use_list_items(&h.api, &user());
    assert_eq!(Some(Vec::new()), list.data());
    h.pool.run_until_stalled();
    assert_eq!(Some(items.clone()), list.data());

    let remove = use_remove_list_item(&h.api, &user());
    let pending = remove.mutate("1".to_string());
    assert_eq!(Some(vec![list_item("2", "b")]), list.data());

    let deleted = h.pool.run_until(pending).unwrap();
    assert!(deleted.success);
    h.pool.run_until_stalled();

    assert_eq!(2, h.transport.count("GET list-items"));
    assert_eq!(1, h.transport.count("DELETE list-items/1"));
}

#[test]
fn create_posts_the_book_id() {
    let h = harness();
    h.transport
        .respond("POST list-items", 200, json!({ "listItem": list_item("3", "") }));

    let create = use_create_list_item(&h.api, &user());
    let created = block_on(create.mutate("b3".to_string())).unwrap();

    assert_eq!("b3", created.book_id);
    let requests = h.transport.requests.borrow();
    assert_eq!(Some(r#"{"bookId":"b3"}"#.to_string()), requests[0].body);
    assert_eq!("Bearer T", requests[0].headers[header::AUTHORIZATION]);
}

#[test]
fn list_item_is_looked_up_by_book() {
    let mut h = harness();
    h.transport.respond(
        "GET list-items",
        200,
        json!({ "listItems": [list_item("1", "a"), list_item("2", "b")] }),
    );

    let entry = use_list_item(&h.api, &user(), "b2");
    assert_eq!(None, entry.list_item());
    h.pool.run_until_stalled();

    assert_eq!(Some(list_item("2", "b")), entry.list_item());
    assert_eq!(None, use_list_item(&h.api, &user(), "b9").list_item());
    assert_eq!(1, h.transport.count("GET list-items"));
}

#[test]
fn search_shows_placeholders_then_seeds_books() {
    let mut h = harness();
    h.transport
        .respond("GET books?query=", 200, json!({"books": [book("1"), book("2")]}));

    let search = use_book_search(&h.api, "", &user());
    let placeholders = search.data().unwrap();
    assert_eq!(LOADING_BOOKS, placeholders.len());
    let ids = placeholders.iter().map(|b| b.id.clone()).collect::<BTreeSet<_>>();
    assert_eq!(LOADING_BOOKS, ids.len());

    h.pool.run_until_stalled();

    assert_eq!(Some(vec![book("1"), book("2")]), search.data());
    assert_eq!(
        Some(book("2")),
        h.api.queries().get_query_data::<Book, ClientError>(book_key("2"))
    );

    // Seeded, so reading the book does not fetch it.
    let cached = use_book(&h.api, "2", &user());
    assert_eq!(Some(book("2")), cached.data());
    h.pool.run_until_stalled();
    assert_eq!(0, h.transport.count("GET books/2"));
}

#[test]
fn search_query_is_encoded() {
    let mut h = harness();
    h.transport.respond(
        "GET books?query=voice+of+war",
        200,
        json!({"books": [book("7")]}),
    );

    let search = use_book_search(&h.api, "voice of war", &user());
    h.pool.run_until_stalled();

    assert_eq!(Some(vec![book("7")]), search.data());
}

#[test]
fn book_placeholder_until_loaded() {
    let mut h = harness();
    h.transport.respond("GET books/1", 200, json!({"book": book("1")}));

    let result = use_book(&h.api, "1", &user());
    assert_eq!(Some(Book::loading()), result.data());

    h.pool.run_until_stalled();
    assert_eq!(Some(book("1")), result.data());
}

#[test]
fn bootstrap_without_token_is_signed_out() {
    let h = harness();
    let session = AuthSession::new(h.api.clone());

    assert_eq!(Ok(None), block_on(session.bootstrap()));
    assert!(session.is_success());
    assert_eq!(None, session.user());
    assert!(h.transport.requests.borrow().is_empty());
}

#[test]
fn bootstrap_seeds_list_items_and_books() {
    let h = harness();
    *h.auth.token.borrow_mut() = Some("T".to_string());
    h.transport.respond(
        "GET bootstrap",
        200,
        json!({"user": user(), "listItems": [list_item("1", "a")]}),
    );

    let session = AuthSession::new(h.api.clone());
    let pending = session.bootstrap();
    assert!(session.is_loading());

    assert_eq!(Ok(Some(user())), block_on(pending));
    assert_eq!(Some(user()), session.user());
    assert_eq!(Some(vec![list_item("1", "a")]), cached_list_items(&h.api));
    assert_eq!(
        Some(book("b1")),
        h.api.queries().get_query_data::<Book, ClientError>(book_key("b1"))
    );
    assert_eq!("Bearer T", h.transport.requests.borrow()[0].headers[header::AUTHORIZATION]);
}

#[test]
fn bootstrap_failure_is_stored() {
    let h = harness();
    *h.auth.token.borrow_mut() = Some("T".to_string());
    h.transport
        .respond("GET bootstrap", 500, json!({"status": 500, "message": "down"}));

    let session = AuthSession::new(h.api.clone());
    assert!(block_on(session.bootstrap()).is_err());

    assert!(session.is_error());
    assert_eq!("down", session.error().unwrap().body().unwrap().message);
}

#[test]
fn login_then_logout() {
    let h = harness();
    h.transport
        .respond("GET books?query=", 200, json!({"books": [book("1")]}));
    let session = AuthSession::new(h.api.clone());

    let rejected = block_on(session.login(Credentials::new("alice", "nope")));
    assert!(rejected.is_err());
    assert_eq!(None, session.user());

    assert_eq!(Ok(user()), block_on(session.login(Credentials::new("alice", "secret"))));
    assert_eq!(Some(user()), session.user());
    assert_eq!(
        Some(vec![book("1")]),
        h.api
            .queries()
            .get_query_data::<Vec<Book>, ClientError>(book_search_key(""))
    );

    block_on(session.logout());
    assert_eq!(None, session.user());
    assert_eq!(1, h.auth.logouts.get());
    assert_eq!(1, h.cleared.get());
    assert_eq!(0, h.api.queries().size());
}

#[test]
fn observer_refetches_after_unauthorized_clear() {
    let mut h = harness();
    h.transport
        .respond("GET list-items", 200, json!({ "listItems": [list_item("1", "a")] }));

    let list = use_list_items(&h.api, &user());
    h.pool.run_until_stalled();
    assert!(matches!(list.state(), QueryState::Loaded(_)));

    h.transport
        .respond("GET books/1", 401, json!({"message": "Please re-authenticate."}));
    let _ = block_on(h.api.request::<Value>("books/1", RequestConfig::new()));
    assert_eq!(1, h.cleared.get());

    assert_eq!(Some(Vec::new()), list.data());
    h.pool.run_until_stalled();
    assert_eq!(Some(vec![list_item("1", "a")]), list.data());
    assert_eq!(2, h.transport.count("GET list-items"));
}

#[test]
fn unauthorized_response_signs_the_session_out() {
    let h = harness();
    h.transport
        .respond("GET books?query=", 200, json!({"books": []}));
    h.transport
        .respond("GET books/1", 401, json!({"message": "Please re-authenticate."}));

    let session = AuthSession::new(h.api.clone());
    block_on(session.login(Credentials::new("alice", "secret"))).unwrap();
    assert_eq!(Some(user()), session.user());

    let error = block_on(h.api.request::<Value>("books/1", RequestConfig::new().token("T")))
        .unwrap_err();

    assert!(error.is_unauthorized());
    assert_eq!(1, h.auth.logouts.get());
    assert_eq!(1, h.cleared.get());
    assert_eq!(None, session.user());
    assert!(session.is_success());
}

#[test]
fn clearing_before_sign_in_leaves_the_session_idle() {
    let h = harness();
    let session = AuthSession::new(h.api.clone());

    h.api.queries().clear();

    assert!(session.is_idle());
}

#[test]
fn mutation_during_first_load_still_loads_the_list() {
    let mut h = harness();
    h.transport
        .respond("GET list-items", 200, json!({ "listItems": [list_item("1", "a")] }));
    h.transport
        .respond("DELETE list-items/9", 200, json!({"success": true}));
    let release = h.transport.gate("GET list-items");

    let list = use_list_items(&h.api, &user());
    h.pool.run_until_stalled();
    assert!(list.is_loading());

    let remove = use_remove_list_item(&h.api, &user());
    let removed = h.pool.run_until(remove.mutate("9".to_string()));
    assert!(removed.is_ok());

    release.send(()).unwrap();
    h.pool.run_until_stalled();

    assert_eq!(Some(vec![list_item("1", "a")]), list.data());
    assert_eq!(2, h.transport.count("GET list-items"));
}
