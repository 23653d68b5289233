use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// Cover shown for placeholder books.
pub const BOOK_PLACEHOLDER_IMAGE: &str = "/assets/book-placeholder.svg";
/// Number of placeholders shown while a search loads.
pub const LOADING_BOOKS: usize = 10;

/// A signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Backend id.
    pub id: String,
    /// Login name.
    pub username: String,
    /// Bearer token for API calls.
    pub token: String,
}

/// A catalog book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    /// Backend id.
    pub id: String,
    /// Title.
    pub title: String,
    /// Author.
    pub author: String,
    /// Url of the cover image.
    pub cover_image_url: String,
    /// Publisher.
    pub publisher: String,
    /// Short description.
    pub synopsis: String,
    /// Set on placeholders shown while the real book is loading.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub loading_book: bool,
}

impl Book {
    /// Stand-in for a book that is still loading.
    pub fn loading() -> Self {
        Self {
            id: "loading-book".to_string(),
            title: "Loading...".to_string(),
            author: "loading...".to_string(),
            cover_image_url: BOOK_PLACEHOLDER_IMAGE.to_string(),
            publisher: "Loading Publishing".to_string(),
            synopsis: "Loading...".to_string(),
            loading_book: true,
        }
    }

    /// Ten placeholders with distinct ids, for search results that are still loading.
    pub fn loading_list() -> Vec<Book> {
        (0..LOADING_BOOKS)
            .map(|index| Book {
                id: format!("loading-book-{index}"),
                ..Book::loading()
            })
            .collect()
    }
}

/// A book on a user's reading list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItem {
    /// Backend id.
    pub id: String,
    /// Id of the book.
    pub book_id: String,
    /// Id of the user owning the item.
    pub owner_id: String,
    /// Star rating, if the user rated the book.
    #[serde(default)]
    pub rating: Option<i8>,
    /// Free-form notes.
    #[serde(default)]
    pub notes: String,
    /// When the book was added to the list.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_date: DateTime<Utc>,
    /// `None` while the book is still being read.
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub finish_date: Option<DateTime<Utc>>,
    /// The book, embedded by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book: Option<Book>,
}

impl ListItem {
    /// Whether the book has been read.
    pub fn is_finished(&self) -> bool {
        self.finish_date.is_some()
    }
}

/// Partial update of a [`ListItem`]. Fields left as `None` are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItemUpdate {
    /// Id of the item to change.
    pub id: String,
    /// New notes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// New rating.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<i8>,
    /// New start date.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_date"
    )]
    pub start_date: Option<DateTime<Utc>>,
    /// `Some(None)` is sent as `null` and marks the book unread.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_nullable_date"
    )]
    pub finish_date: Option<Option<DateTime<Utc>>>,
}

impl ListItemUpdate {
    /// An update of item `id` that changes nothing yet.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Sets the notes.
    pub fn notes(self, notes: impl Into<String>) -> Self {
        Self {
            notes: Some(notes.into()),
            ..self
        }
    }

    /// Sets the rating.
    pub fn rating(self, rating: i8) -> Self {
        Self {
            rating: Some(rating),
            ..self
        }
    }

    /// Sets the start date.
    pub fn start_date(self, start_date: DateTime<Utc>) -> Self {
        Self {
            start_date: Some(start_date),
            ..self
        }
    }

    /// Sets or clears the finish date.
    pub fn finish_date(self, finish_date: Option<DateTime<Utc>>) -> Self {
        Self {
            finish_date: Some(finish_date),
            ..self
        }
    }

    /// Writes the fields present in this update into `item`.
    pub fn apply(&self, item: &mut ListItem) {
        if let Some(notes) = &self.notes {
            item.notes = notes.clone();
        }
        if let Some(rating) = self.rating {
            item.rating = Some(rating);
        }
        if let Some(start_date) = self.start_date {
            item.start_date = start_date;
        }
        if let Some(finish_date) = self.finish_date {
            item.finish_date = finish_date;
        }
    }
}

fn serialize_date<S: Serializer>(
    date: &Option<DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serialize_nullable_date(&date.map(Some), serializer)
}

fn serialize_nullable_date<S: Serializer>(
    date: &Option<Option<DateTime<Utc>>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match date.flatten() {
        Some(date) => serializer.serialize_i64(date.timestamp_millis()),
        None => serializer.serialize_none(),
    }
}

/// Username and password for login and registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewListItem<'a> {
    pub book_id: &'a str,
}

/// Body of `GET bootstrap`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapResponse {
    /// The user.
    pub user: User,
    /// The user's reading list.
    #[serde(default)]
    pub list_items: Vec<ListItem>,
}

/// Body of `GET books/:id`.
#[derive(Debug, Clone, Deserialize)]
pub struct BookResponse {
    /// The book.
    pub book: Book,
}

/// Body of `GET books?query=`.
#[derive(Debug, Clone, Deserialize)]
pub struct BooksResponse {
    /// Matching books.
    pub books: Vec<Book>,
}

/// Body of `GET list-items`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItemsResponse {
    /// The user's reading list.
    pub list_items: Vec<ListItem>,
}

/// Body of list-item create and update.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItemResponse {
    /// The stored item.
    pub list_item: ListItem,
}

/// Body of `DELETE list-items/:id`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteResponse {
    /// Whether the item was removed.
    #[serde(default)]
    pub success: bool,
}

/// Body of login and registration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    /// The user.
    pub user: User,
}
