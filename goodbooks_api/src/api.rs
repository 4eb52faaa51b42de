use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use paperclip::actix::Apiv2Schema;
use serde::{Deserialize, Serialize};

pub type BookId = i64;
pub type UserId = i64;
pub type TagId = i64;

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const DEFAULT_TOP_K: i64 = 20;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
/// Book reference data, loaded in bulk and never modified through the api
pub struct Book {
    pub book_id: BookId,
    /// Key used by the book to tag association, distinct from book_id
    pub goodreads_book_id: i64,
    pub title: String,
    pub authors: String,
    pub average_rating: f64,
    pub ratings_count: i64,
    pub original_publication_year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small_image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Rating of a book by a user, at most one per (user_id, book_id) pair
pub struct Rating {
    pub user_id: UserId,
    pub book_id: BookId,
    pub rating: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct Tag {
    pub tag_id: TagId,
    pub tag_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Association between a book (by goodreads_book_id) and a tag, weighted by count
pub struct BookTag {
    pub goodreads_book_id: i64,
    pub tag_id: TagId,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct ToRead {
    pub user_id: UserId,
    pub book_id: BookId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Entity together with its storage generated identifier, rendered as `_id`
pub struct Document<T> {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub inner: T,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Tag attached to a single book
pub struct BookTagCount {
    pub tag_id: TagId,
    pub tag_name: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Tag with the number of book_tags rows referencing it
pub struct TagPopularity {
    pub tag_id: TagId,
    pub tag_name: String,
    pub book_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub page: u64,
    pub page_size: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatingSummary {
    pub book_id: BookId,
    pub average_rating: f64,
    pub ratings_count: u64,
    /// Occurrences of every rating value from 1 to 5, zero buckets included
    pub histogram: BTreeMap<u8, u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
#[serde(rename_all = "lowercase")]
pub enum UpsertStatus {
    Created,
    Updated,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct UpsertRatingResponse {
    pub status: UpsertStatus,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    /// User has no rating of 4 or more, most rated books are returned
    Popular,
    /// Best rated books the user has not rated yet
    BasedOnRatings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendations {
    pub recommendations: Vec<Document<Book>>,
    #[serde(rename = "type")]
    pub kind: RecommendationKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Number of documents stored in every collection
pub struct CollectionCounts {
    pub books: u64,
    pub ratings: u64,
    pub tags: u64,
    pub book_tags: u64,
    pub to_read: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub collections: CollectionCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct RootResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Body of every error response
pub struct ErrorResponse {
    pub detail: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
#[serde(rename_all = "snake_case")]
pub enum BookSortField {
    #[default]
    Avg,
    RatingsCount,
    Year,
    Title,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

fn default_page() -> i64 {
    DEFAULT_PAGE
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

fn default_top_k() -> i64 {
    DEFAULT_TOP_K
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Apiv2Schema)]
/// Query parameters of GET /books
pub struct ListBooksParams {
    /// Case insensitive substring of title or authors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_avg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_from: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_to: Option<i32>,
    #[serde(default)]
    pub sort: BookSortField,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

impl Default for ListBooksParams {
    fn default() -> Self {
        Self {
            q: None,
            min_avg: None,
            year_from: None,
            year_to: None,
            sort: BookSortField::default(),
            order: SortOrder::default(),
            page: DEFAULT_PAGE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct RecommendationParams {
    #[serde(default = "default_top_k")]
    pub top_k: i64,
}

impl Default for RecommendationParams {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
        }
    }
}
