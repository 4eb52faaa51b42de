use std::collections::BTreeMap;

pub use in_memory_book_store::InMemoryBookStore;
pub use postgres_book_store::{PostgresBookStore, PostgresBookStoreConfig};

use crate::api::{
    Book, BookId, BookSortField, BookTagCount, Document, Rating, SortOrder, TagPopularity,
    UpsertStatus, UserId,
};

pub(crate) mod in_memory_book_store;
mod postgres_book_store;

/// Identifier generated by the store for every document
pub type DocumentId = i64;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Failed to deserialize document: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Database failure {0}")]
    DatabaseFailure(#[from] tokio_postgres::Error),

    #[error("Other error {0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Collection {
    Books,
    Ratings,
    Tags,
    BookTags,
    ToRead,
}

impl Collection {
    /// Load order used by the bulk loader
    pub const ALL: [Collection; 5] = [
        Collection::Books,
        Collection::Ratings,
        Collection::Tags,
        Collection::BookTags,
        Collection::ToRead,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Books => "books",
            Collection::Ratings => "ratings",
            Collection::Tags => "tags",
            Collection::BookTags => "book_tags",
            Collection::ToRead => "to_read",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stored<T> {
    pub id: DocumentId,
    pub document: T,
}

impl<T> From<Stored<T>> for Document<T> {
    fn from(stored: Stored<T>) -> Self {
        Document {
            id: stored.id.to_string(),
            inner: stored.document,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
/// Conjunction of book predicates, unset fields do not filter
pub struct BookFilter {
    /// Substring of title or authors, case insensitive
    pub text: Option<String>,
    /// Substring of authors, case insensitive
    pub author: Option<String>,
    pub min_average_rating: Option<f64>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub book_ids: Option<Vec<BookId>>,
    pub excluded_book_ids: Vec<BookId>,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct BookSort {
    pub field: BookSortField,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
/// Slice of a result set, no limit means everything after skip
pub struct Window {
    pub skip: u64,
    pub limit: Option<u64>,
}

impl Window {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn first(limit: u64) -> Self {
        Self {
            skip: 0,
            limit: Some(limit),
        }
    }
}

#[async_trait::async_trait]
pub trait BookStore: Send + Sync {
    /// Round trip to the store, fails when it is unreachable
    async fn ping(&self) -> Result<(), StoreError>;

    async fn count_documents(&self, collection: Collection) -> Result<u64, StoreError>;

    /// Number of books matching the filter, independent of any window
    async fn count_books(&self, filter: &BookFilter) -> Result<u64, StoreError>;

    /// Books matching the filter, in storage order when no sort is given.
    /// Ties are always broken by storage id ascending
    async fn find_books(
        &self,
        filter: &BookFilter,
        sort: Option<BookSort>,
        window: Window,
    ) -> Result<Vec<Stored<Book>>, StoreError>;

    async fn find_book(&self, book_id: BookId) -> Result<Option<Stored<Book>>, StoreError>;

    /// book_tags rows of the book joined with tags, count descending.
    /// Rows whose tag does not exist are dropped
    async fn book_tags(
        &self,
        goodreads_book_id: i64,
    ) -> Result<Vec<Stored<BookTagCount>>, StoreError>;

    /// Every tag with the number of book_tags rows referencing it, count descending
    async fn tag_popularity(&self, window: Window)
        -> Result<Vec<Stored<TagPopularity>>, StoreError>;

    async fn to_read_book_ids(&self, user_id: UserId) -> Result<Vec<BookId>, StoreError>;

    /// Occurrences of every rating value given to the book
    async fn rating_counts(&self, book_id: BookId) -> Result<BTreeMap<i64, u64>, StoreError>;

    /// Distinct books rated by the user, optionally only with rating >= min_rating
    async fn rated_book_ids(
        &self,
        user_id: UserId,
        min_rating: Option<i64>,
    ) -> Result<Vec<BookId>, StoreError>;

    /// Replaces the rating of (user_id, book_id) or creates it
    async fn upsert_rating(&self, rating: Rating) -> Result<UpsertStatus, StoreError>;

    /// Replaces the whole content of the collection, all or nothing.
    /// Returns the number of inserted documents
    async fn replace_collection(
        &self,
        collection: Collection,
        documents: Vec<serde_json::Value>,
    ) -> Result<u64, StoreError>;

    async fn ensure_indexes(&self) -> Result<(), StoreError>;
}
