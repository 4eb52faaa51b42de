//! Translates validated request parameters into store queries and shapes the results.
//!
//! Validation happens here, before any store call: page >= 1, page_size in 1..=100,
//! min_avg in 1..=5, years in 1000..=2100, top_k in 1..=100 and rating in 1..=5.
//! Every returned entity carries its storage identifier as a string `_id`.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::Utc;

use crate::api::{
    Book, BookId, BookSortField, BookTagCount, CollectionCounts, Document, HealthResponse,
    ListBooksParams, MetricsResponse, PaginatedResponse, PaginationParams, Rating,
    RatingSummary, RecommendationKind, RecommendationParams, Recommendations, SortOrder,
    TagPopularity, UpsertStatus, UserId,
};
use crate::book_store::{BookFilter, BookSort, BookStore, Collection, Stored, Window};
use crate::error::ApiError;

const PAGE_SIZE_RANGE: RangeInclusive<i64> = 1..=100;
const TOP_K_RANGE: RangeInclusive<i64> = 1..=100;
const AVERAGE_RATING_RANGE: RangeInclusive<f64> = 1.0..=5.0;
const YEAR_RANGE: RangeInclusive<i32> = 1000..=2100;
const RATING_RANGE: RangeInclusive<i64> = 1..=5;
/// Ratings at or above this value make recommendations personal
const LIKED_RATING: i64 = 4;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Pagination {
    pub page: u64,
    pub page_size: u64,
}

impl Pagination {
    pub fn new(page: i64, page_size: i64) -> Result<Self, ApiError> {
        if page < 1 {
            return Err(ApiError::Validation(
                "page must be greater than or equal to 1".to_string(),
            ));
        }
        if !PAGE_SIZE_RANGE.contains(&page_size) {
            return Err(ApiError::Validation(format!(
                "page_size must be between {} and {}",
                PAGE_SIZE_RANGE.start(),
                PAGE_SIZE_RANGE.end()
            )));
        }
        Ok(Self {
            page: page as u64,
            page_size: page_size as u64,
        })
    }

    pub fn window(&self) -> Window {
        Window {
            skip: (self.page - 1).saturating_mul(self.page_size),
            limit: Some(self.page_size),
        }
    }

    pub fn respond<T>(&self, items: Vec<T>, total: u64) -> PaginatedResponse<T> {
        PaginatedResponse {
            items,
            page: self.page,
            page_size: self.page_size,
            total,
        }
    }
}

fn check_range<T: PartialOrd + std::fmt::Display>(
    name: &str,
    value: Option<T>,
    range: &RangeInclusive<T>,
) -> Result<Option<T>, ApiError> {
    match value {
        Some(value) if !range.contains(&value) => Err(ApiError::Validation(format!(
            "{} must be between {} and {}",
            name,
            range.start(),
            range.end()
        ))),
        value => Ok(value),
    }
}

fn documents<T>(stored: Vec<Stored<T>>) -> Vec<Document<T>> {
    stored.into_iter().map(Document::from).collect()
}

/// Rounds to 2 decimal places
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn BookStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn BookStore>) -> Self {
        Self { store }
    }

    pub async fn health(&self) -> Result<HealthResponse, ApiError> {
        self.store.ping().await.map_err(|err| {
            tracing::warn!("Health check failed {}", err);
            ApiError::DependencyUnavailable(err.to_string())
        })?;
        Ok(HealthResponse {
            status: "healthy".to_string(),
            database: "connected".to_string(),
            timestamp: Utc::now(),
        })
    }

    pub async fn metrics(&self) -> Result<MetricsResponse, ApiError> {
        Ok(MetricsResponse {
            timestamp: Utc::now(),
            collections: CollectionCounts {
                books: self.store.count_documents(Collection::Books).await?,
                ratings: self.store.count_documents(Collection::Ratings).await?,
                tags: self.store.count_documents(Collection::Tags).await?,
                book_tags: self.store.count_documents(Collection::BookTags).await?,
                to_read: self.store.count_documents(Collection::ToRead).await?,
            },
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_books(
        &self,
        params: ListBooksParams,
    ) -> Result<PaginatedResponse<Document<Book>>, ApiError> {
        let pagination = Pagination::new(params.page, params.page_size)?;
        let filter = BookFilter {
            text: params.q.filter(|q| !q.is_empty()),
            min_average_rating: check_range("min_avg", params.min_avg, &AVERAGE_RATING_RANGE)?,
            year_from: check_range("year_from", params.year_from, &YEAR_RANGE)?,
            year_to: check_range("year_to", params.year_to, &YEAR_RANGE)?,
            ..BookFilter::default()
        };
        let sort = BookSort {
            field: params.sort,
            order: params.order,
        };

        let total = self.store.count_books(&filter).await?;
        let books = self
            .store
            .find_books(&filter, Some(sort), pagination.window())
            .await?;
        Ok(pagination.respond(documents(books), total))
    }

    pub async fn get_book(&self, book_id: BookId) -> Result<Document<Book>, ApiError> {
        self.store
            .find_book(book_id)
            .await?
            .map(Document::from)
            .ok_or_else(ApiError::book_not_found)
    }

    /// Tags are attached through goodreads_book_id, never through book_id
    pub async fn get_book_tags(
        &self,
        book_id: BookId,
    ) -> Result<Vec<Document<BookTagCount>>, ApiError> {
        let book = self
            .store
            .find_book(book_id)
            .await?
            .ok_or_else(ApiError::book_not_found)?;
        let tags = self
            .store
            .book_tags(book.document.goodreads_book_id)
            .await?;
        Ok(documents(tags))
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_author_books(
        &self,
        author: String,
        params: PaginationParams,
    ) -> Result<PaginatedResponse<Document<Book>>, ApiError> {
        let pagination = Pagination::new(params.page, params.page_size)?;
        let filter = BookFilter {
            author: Some(author),
            ..BookFilter::default()
        };
        let sort = BookSort {
            field: BookSortField::Avg,
            order: SortOrder::Desc,
        };

        let total = self.store.count_books(&filter).await?;
        let books = self
            .store
            .find_books(&filter, Some(sort), pagination.window())
            .await?;
        Ok(pagination.respond(documents(books), total))
    }

    /// Total is the number of all tags, whatever the page holds
    pub async fn list_tags(
        &self,
        params: PaginationParams,
    ) -> Result<PaginatedResponse<Document<TagPopularity>>, ApiError> {
        let pagination = Pagination::new(params.page, params.page_size)?;
        let tags = self.store.tag_popularity(pagination.window()).await?;
        let total = self.store.count_documents(Collection::Tags).await?;
        Ok(pagination.respond(documents(tags), total))
    }

    pub async fn get_user_to_read(&self, user_id: UserId) -> Result<Vec<Document<Book>>, ApiError> {
        let book_ids = self.store.to_read_book_ids(user_id).await?;
        if book_ids.is_empty() {
            return Ok(vec![]);
        }
        let filter = BookFilter {
            book_ids: Some(book_ids),
            ..BookFilter::default()
        };
        let books = self.store.find_books(&filter, None, Window::all()).await?;
        Ok(documents(books))
    }

    pub async fn get_ratings_summary(&self, book_id: BookId) -> Result<RatingSummary, ApiError> {
        self.store
            .find_book(book_id)
            .await?
            .ok_or_else(ApiError::book_not_found)?;

        let counts = self.store.rating_counts(book_id).await?;
        let mut histogram: BTreeMap<u8, u64> = RATING_RANGE.map(|value| (value as u8, 0)).collect();
        let mut ratings_count = 0;
        let mut ratings_sum = 0.0;
        for (rating, count) in counts {
            ratings_count += count;
            ratings_sum += rating as f64 * count as f64;
            if RATING_RANGE.contains(&rating) {
                *histogram.entry(rating as u8).or_default() += count;
            } else {
                tracing::warn!("Book {} has out of range rating {}", book_id, rating);
            }
        }
        let average_rating = if ratings_count == 0 {
            0.0
        } else {
            round2(ratings_sum / ratings_count as f64)
        };

        Ok(RatingSummary {
            book_id,
            average_rating,
            ratings_count,
            histogram,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn upsert_rating(&self, rating: Rating) -> Result<UpsertStatus, ApiError> {
        if !RATING_RANGE.contains(&rating.rating) {
            return Err(ApiError::Validation(format!(
                "rating must be between {} and {}",
                RATING_RANGE.start(),
                RATING_RANGE.end()
            )));
        }
        self.store
            .find_book(rating.book_id)
            .await?
            .ok_or_else(ApiError::book_not_found)?;

        let status = self.store.upsert_rating(rating).await?;
        tracing::info!("Rating upsert finished with {:?}", status);
        Ok(status)
    }

    /// Users without a liked book get the most rated books, everybody else the best
    /// rated books they have not rated yet
    #[tracing::instrument(skip(self))]
    pub async fn get_recommendations(
        &self,
        user_id: UserId,
        params: RecommendationParams,
    ) -> Result<Recommendations, ApiError> {
        let top_k = check_range("top_k", Some(params.top_k), &TOP_K_RANGE)?
            .unwrap_or(params.top_k) as u64;

        let liked = self
            .store
            .rated_book_ids(user_id, Some(LIKED_RATING))
            .await?;
        let (filter, sort, kind) = if liked.is_empty() {
            (
                BookFilter::default(),
                BookSort {
                    field: BookSortField::RatingsCount,
                    order: SortOrder::Desc,
                },
                RecommendationKind::Popular,
            )
        } else {
            (
                BookFilter {
                    excluded_book_ids: self.store.rated_book_ids(user_id, None).await?,
                    ..BookFilter::default()
                },
                BookSort {
                    field: BookSortField::Avg,
                    order: SortOrder::Desc,
                },
                RecommendationKind::BasedOnRatings,
            )
        };

        let books = self
            .store
            .find_books(&filter, Some(sort), Window::first(top_k))
            .await?;
        Ok(Recommendations {
            recommendations: documents(books),
            kind,
        })
    }
}
