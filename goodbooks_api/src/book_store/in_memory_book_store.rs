use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use itertools::Itertools;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;

use crate::api::{
    Book, BookId, BookSortField, BookTag, BookTagCount, Rating, SortOrder, Tag, TagPopularity,
    ToRead, UpsertStatus, UserId,
};
use crate::book_store::{
    BookFilter, BookSort, BookStore, Collection, Stored, StoreError, Window,
};

/// Keeps every collection in a vector in insertion order, which is the storage id order
#[derive(Debug)]
pub struct InMemoryBookStore {
    id_sequence_generator: AtomicI64,
    books: RwLock<Vec<Stored<Book>>>,
    ratings: RwLock<Vec<Stored<Rating>>>,
    tags: RwLock<Vec<Stored<Tag>>>,
    book_tags: RwLock<Vec<Stored<BookTag>>>,
    to_read: RwLock<Vec<Stored<ToRead>>>,
}

impl Default for InMemoryBookStore {
    fn default() -> Self {
        Self {
            id_sequence_generator: AtomicI64::new(1),
            books: Default::default(),
            ratings: Default::default(),
            tags: Default::default(),
            book_tags: Default::default(),
            to_read: Default::default(),
        }
    }
}

impl InMemoryBookStore {
    fn next_id(&self) -> i64 {
        self.id_sequence_generator.fetch_add(1, Ordering::Relaxed)
    }

    fn replace<T: DeserializeOwned + UniqueKey>(
        &self,
        collection: Collection,
        target: &RwLock<Vec<Stored<T>>>,
        documents: Vec<serde_json::Value>,
    ) -> Result<u64, StoreError> {
        // Parse and check everything first so a bad document leaves the collection untouched
        let parsed: Vec<T> = documents
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()?;
        let mut keys = HashSet::new();
        if let Some(duplicate) = parsed
            .iter()
            .filter_map(UniqueKey::unique_key)
            .find(|key| !keys.insert(*key))
        {
            return Err(StoreError::Other(format!(
                "Duplicate key {:?} in {}",
                duplicate, collection
            )));
        }

        let stored: Vec<Stored<T>> = parsed
            .into_iter()
            .map(|document| Stored {
                id: self.next_id(),
                document,
            })
            .collect();
        let inserted = stored.len() as u64;
        *target.write() = stored;
        Ok(inserted)
    }
}

/// Key covered by a unique index of the collection, if it has one
trait UniqueKey {
    fn unique_key(&self) -> Option<(i64, i64)>;
}

impl UniqueKey for Book {
    fn unique_key(&self) -> Option<(i64, i64)> {
        Some((self.book_id, 0))
    }
}

impl UniqueKey for Rating {
    fn unique_key(&self) -> Option<(i64, i64)> {
        Some((self.user_id, self.book_id))
    }
}

impl UniqueKey for Tag {
    fn unique_key(&self) -> Option<(i64, i64)> {
        Some((self.tag_id, 0))
    }
}

impl UniqueKey for BookTag {
    fn unique_key(&self) -> Option<(i64, i64)> {
        None
    }
}

impl UniqueKey for ToRead {
    fn unique_key(&self) -> Option<(i64, i64)> {
        Some((self.user_id, self.book_id))
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn matches(filter: &BookFilter, book: &Book) -> bool {
    if let Some(text) = &filter.text {
        if !contains_ignore_case(&book.title, text) && !contains_ignore_case(&book.authors, text)
        {
            return false;
        }
    }
    if let Some(author) = &filter.author {
        if !contains_ignore_case(&book.authors, author) {
            return false;
        }
    }
    if let Some(min_average_rating) = filter.min_average_rating {
        if book.average_rating < min_average_rating {
            return false;
        }
    }
    if filter.year_from.is_some() || filter.year_to.is_some() {
        // A book without a year never matches a year range
        let Some(year) = book.original_publication_year else {
            return false;
        };
        if filter.year_from.is_some_and(|from| year < from)
            || filter.year_to.is_some_and(|to| year > to)
        {
            return false;
        }
    }
    if let Some(book_ids) = &filter.book_ids {
        if !book_ids.contains(&book.book_id) {
            return false;
        }
    }
    !filter.excluded_book_ids.contains(&book.book_id)
}

fn compare_books(sort: BookSort, left: &Book, right: &Book) -> CmpOrdering {
    let ordering = match sort.field {
        BookSortField::Avg => left.average_rating.total_cmp(&right.average_rating),
        BookSortField::RatingsCount => left.ratings_count.cmp(&right.ratings_count),
        // None is lower than any year
        BookSortField::Year => left
            .original_publication_year
            .cmp(&right.original_publication_year),
        BookSortField::Title => left.title.cmp(&right.title),
    };
    match sort.order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

fn apply_window<T>(items: impl Iterator<Item = T>, window: Window) -> Vec<T> {
    let items = items.skip(window.skip as usize);
    match window.limit {
        Some(limit) => items.take(limit as usize).collect(),
        None => items.collect(),
    }
}

#[async_trait::async_trait]
impl BookStore for InMemoryBookStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn count_documents(&self, collection: Collection) -> Result<u64, StoreError> {
        let count = match collection {
            Collection::Books => self.books.read().len(),
            Collection::Ratings => self.ratings.read().len(),
            Collection::Tags => self.tags.read().len(),
            Collection::BookTags => self.book_tags.read().len(),
            Collection::ToRead => self.to_read.read().len(),
        };
        Ok(count as u64)
    }

    async fn count_books(&self, filter: &BookFilter) -> Result<u64, StoreError> {
        Ok(self
            .books
            .read()
            .iter()
            .filter(|stored| matches(filter, &stored.document))
            .count() as u64)
    }

    async fn find_books(
        &self,
        filter: &BookFilter,
        sort: Option<BookSort>,
        window: Window,
    ) -> Result<Vec<Stored<Book>>, StoreError> {
        let books = self.books.read();
        let matching = books
            .iter()
            .filter(|stored| matches(filter, &stored.document));
        // sorted_by is stable, so ties keep the storage id order
        let sorted: Vec<&Stored<Book>> = match sort {
            Some(sort) => matching
                .sorted_by(|left, right| compare_books(sort, &left.document, &right.document))
                .collect(),
            None => matching.collect(),
        };
        Ok(apply_window(sorted.into_iter().cloned(), window))
    }

    async fn find_book(&self, book_id: BookId) -> Result<Option<Stored<Book>>, StoreError> {
        Ok(self
            .books
            .read()
            .iter()
            .find(|stored| stored.document.book_id == book_id)
            .cloned())
    }

    async fn book_tags(
        &self,
        goodreads_book_id: i64,
    ) -> Result<Vec<Stored<BookTagCount>>, StoreError> {
        let tags = self.tags.read();
        let book_tags = self.book_tags.read();
        Ok(book_tags
            .iter()
            .filter(|stored| stored.document.goodreads_book_id == goodreads_book_id)
            .flat_map(|stored| {
                tags.iter()
                    .filter(move |tag| tag.document.tag_id == stored.document.tag_id)
                    .map(move |tag| Stored {
                        id: stored.id,
                        document: BookTagCount {
                            tag_id: stored.document.tag_id,
                            tag_name: tag.document.tag_name.clone(),
                            count: stored.document.count,
                        },
                    })
            })
            .sorted_by(|left, right| right.document.count.cmp(&left.document.count))
            .collect())
    }

    async fn tag_popularity(
        &self,
        window: Window,
    ) -> Result<Vec<Stored<TagPopularity>>, StoreError> {
        let book_tags = self.book_tags.read();
        let mut rows_per_tag: HashMap<i64, u64> = HashMap::new();
        for stored in book_tags.iter() {
            *rows_per_tag.entry(stored.document.tag_id).or_default() += 1;
        }

        let tags = self.tags.read();
        let ranked = tags
            .iter()
            .map(|tag| Stored {
                id: tag.id,
                document: TagPopularity {
                    tag_id: tag.document.tag_id,
                    tag_name: tag.document.tag_name.clone(),
                    book_count: rows_per_tag
                        .get(&tag.document.tag_id)
                        .cloned()
                        .unwrap_or_default(),
                },
            })
            .sorted_by(|left, right| right.document.book_count.cmp(&left.document.book_count));
        Ok(apply_window(ranked, window))
    }

    async fn to_read_book_ids(&self, user_id: UserId) -> Result<Vec<BookId>, StoreError> {
        Ok(self
            .to_read
            .read()
            .iter()
            .filter(|stored| stored.document.user_id == user_id)
            .map(|stored| stored.document.book_id)
            .collect())
    }

    async fn rating_counts(&self, book_id: BookId) -> Result<BTreeMap<i64, u64>, StoreError> {
        Ok(self
            .ratings
            .read()
            .iter()
            .filter(|stored| stored.document.book_id == book_id)
            .fold(BTreeMap::new(), |mut counts, stored| {
                *counts.entry(stored.document.rating).or_default() += 1;
                counts
            }))
    }

    async fn rated_book_ids(
        &self,
        user_id: UserId,
        min_rating: Option<i64>,
    ) -> Result<Vec<BookId>, StoreError> {
        let mut seen: HashSet<BookId> = HashSet::new();
        Ok(self
            .ratings
            .read()
            .iter()
            .filter(|stored| stored.document.user_id == user_id)
            .filter(|stored| min_rating.map_or(true, |min| stored.document.rating >= min))
            .map(|stored| stored.document.book_id)
            .filter(|book_id| seen.insert(*book_id))
            .collect())
    }

    async fn upsert_rating(&self, rating: Rating) -> Result<UpsertStatus, StoreError> {
        let mut ratings = self.ratings.write();
        let existing = ratings.iter().position(|stored| {
            stored.document.user_id == rating.user_id && stored.document.book_id == rating.book_id
        });
        match existing {
            Some(position) => {
                ratings[position].document = rating;
                Ok(UpsertStatus::Updated)
            }
            None => {
                ratings.push(Stored {
                    id: self.next_id(),
                    document: rating,
                });
                Ok(UpsertStatus::Created)
            }
        }
    }

    async fn replace_collection(
        &self,
        collection: Collection,
        documents: Vec<serde_json::Value>,
    ) -> Result<u64, StoreError> {
        match collection {
            Collection::Books => self.replace(collection, &self.books, documents),
            Collection::Ratings => self.replace(collection, &self.ratings, documents),
            Collection::Tags => self.replace(collection, &self.tags, documents),
            Collection::BookTags => self.replace(collection, &self.book_tags, documents),
            Collection::ToRead => self.replace(collection, &self.to_read, documents),
        }
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        // Lookups are linear scans, uniqueness is checked by replace and upsert_rating
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::json;

    use super::*;

    /// Small dataset shared by the store, service and handler tests
    /// Books:
    /// 1. "The Hunger Games" by Suzanne Collins, avg 4.34, 4780653 ratings, 2008, goodreads 2767052
    /// 2. "Harry Potter and the Sorcerer's Stone" by J.K. Rowling, Mary GrandPré, avg 4.44, 4602479 ratings, 1997, goodreads 3
    /// 3. "Twilight" by Stephenie Meyer, avg 3.57, 3866839 ratings, 2005, goodreads 41865
    /// 4. "Mockingjay" by Suzanne Collins, avg 4.03, 1719760 ratings, 2010, goodreads 7260188
    /// 5. "Untitled" by Anonymous, avg 3.00, 10 ratings, no year, goodreads 99
    pub(crate) async fn seeded_store() -> InMemoryBookStore {
        let store = InMemoryBookStore::default();
        store
            .replace_collection(
                Collection::Books,
                vec![
                    book(1, 2767052, "The Hunger Games", "Suzanne Collins", 4.34, 4780653, Some(2008)),
                    book(2, 3, "Harry Potter and the Sorcerer's Stone", "J.K. Rowling, Mary GrandPré", 4.44, 4602479, Some(1997)),
                    book(3, 41865, "Twilight", "Stephenie Meyer", 3.57, 3866839, Some(2005)),
                    book(4, 7260188, "Mockingjay", "Suzanne Collins", 4.03, 1719760, Some(2010)),
                    book(5, 99, "Untitled", "Anonymous", 3.0, 10, None),
                ],
            )
            .await
            .expect("Failed to load books");
        store
            .replace_collection(
                Collection::Tags,
                vec![
                    json!({"tag_id": 10, "tag_name": "to-read"}),
                    json!({"tag_id": 11, "tag_name": "fantasy"}),
                    json!({"tag_id": 12, "tag_name": "dystopia"}),
                    json!({"tag_id": 13, "tag_name": "unused"}),
                ],
            )
            .await
            .expect("Failed to load tags");
        store
            .replace_collection(
                Collection::BookTags,
                vec![
                    json!({"goodreads_book_id": 2767052, "tag_id": 12, "count": 500}),
                    json!({"goodreads_book_id": 2767052, "tag_id": 10, "count": 9000}),
                    json!({"goodreads_book_id": 2767052, "tag_id": 999, "count": 7000}),
                    json!({"goodreads_book_id": 3, "tag_id": 11, "count": 800}),
                    json!({"goodreads_book_id": 3, "tag_id": 10, "count": 1200}),
                    json!({"goodreads_book_id": 7260188, "tag_id": 12, "count": 300}),
                    json!({"goodreads_book_id": 41865, "tag_id": 12, "count": 20}),
                ],
            )
            .await
            .expect("Failed to load book tags");
        store
            .replace_collection(
                Collection::Ratings,
                vec![
                    json!({"user_id": 1, "book_id": 1, "rating": 5}),
                    json!({"user_id": 1, "book_id": 3, "rating": 2}),
                    json!({"user_id": 2, "book_id": 1, "rating": 4}),
                    json!({"user_id": 3, "book_id": 1, "rating": 3}),
                    json!({"user_id": 4, "book_id": 2, "rating": 3}),
                ],
            )
            .await
            .expect("Failed to load ratings");
        store
            .replace_collection(
                Collection::ToRead,
                vec![
                    json!({"user_id": 1, "book_id": 4}),
                    json!({"user_id": 1, "book_id": 2}),
                    json!({"user_id": 2, "book_id": 3}),
                ],
            )
            .await
            .expect("Failed to load to read");
        store
    }

    fn book(
        book_id: i64,
        goodreads_book_id: i64,
        title: &str,
        authors: &str,
        average_rating: f64,
        ratings_count: i64,
        original_publication_year: Option<i32>,
    ) -> serde_json::Value {
        json!({
            "book_id": book_id,
            "goodreads_book_id": goodreads_book_id,
            "title": title,
            "authors": authors,
            "average_rating": average_rating,
            "ratings_count": ratings_count,
            "original_publication_year": original_publication_year,
        })
    }
}

#[cfg(test)]
mod in_memory_book_store_tests {
    use serde_json::json;

    use super::fixtures::seeded_store;
    use super::*;

    fn book_ids(books: &[Stored<Book>]) -> Vec<BookId> {
        books.iter().map(|stored| stored.document.book_id).collect()
    }

    #[tokio::test]
    /// Tests filtering and counting of books
    /// 1. Text filter matches title or authors, ignoring case
    /// 2. Year range excludes books without year
    /// 3. Minimum average rating
    /// 4. Explicit id set and exclusions
    async fn test_count_and_filter_books() {
        let store = seeded_store().await;

        let all = store.count_books(&BookFilter::default()).await.unwrap();
        assert_eq!(all, 5);

        let suzanne = BookFilter {
            text: Some("sUzAnNe".to_string()),
            ..BookFilter::default()
        };
        assert_eq!(store.count_books(&suzanne).await.unwrap(), 2);

        let by_title = BookFilter {
            text: Some("twili".to_string()),
            ..BookFilter::default()
        };
        assert_eq!(store.count_books(&by_title).await.unwrap(), 1);

        let years = BookFilter {
            year_from: Some(1000),
            year_to: Some(2008),
            ..BookFilter::default()
        };
        let found = store
            .find_books(&years, None, Window::all())
            .await
            .unwrap();
        assert_eq!(book_ids(&found), vec![1, 2, 3]);

        let min_avg = BookFilter {
            min_average_rating: Some(4.0),
            ..BookFilter::default()
        };
        assert_eq!(store.count_books(&min_avg).await.unwrap(), 3);

        let ids = BookFilter {
            book_ids: Some(vec![4, 2, 42]),
            excluded_book_ids: vec![2],
            ..BookFilter::default()
        };
        let found = store.find_books(&ids, None, Window::all()).await.unwrap();
        assert_eq!(book_ids(&found), vec![4]);
    }

    #[tokio::test]
    /// Tests sorting and windowing of books
    /// 1. Year ascending puts the book without year first
    /// 2. Year descending puts it last
    /// 3. Window skips and limits after sorting
    async fn test_sort_and_window_books() {
        let store = seeded_store().await;
        let year_asc = BookSort {
            field: BookSortField::Year,
            order: SortOrder::Asc,
        };
        let found = store
            .find_books(&BookFilter::default(), Some(year_asc), Window::all())
            .await
            .unwrap();
        assert_eq!(book_ids(&found), vec![5, 2, 3, 1, 4]);

        let year_desc = BookSort {
            field: BookSortField::Year,
            order: SortOrder::Desc,
        };
        let found = store
            .find_books(&BookFilter::default(), Some(year_desc), Window::all())
            .await
            .unwrap();
        assert_eq!(book_ids(&found), vec![4, 1, 3, 2, 5]);

        let title_asc = BookSort {
            field: BookSortField::Title,
            order: SortOrder::Asc,
        };
        let found = store
            .find_books(
                &BookFilter::default(),
                Some(title_asc),
                Window {
                    skip: 1,
                    limit: Some(2),
                },
            )
            .await
            .unwrap();
        assert_eq!(book_ids(&found), vec![4, 1]);
    }

    #[tokio::test]
    /// Tests the tag join of a single book
    /// 1. Rows are joined through goodreads_book_id and sorted by count descending
    /// 2. Rows pointing to an unknown tag are dropped
    /// 3. A book without rows gets an empty list
    async fn test_book_tags_join() {
        let store = seeded_store().await;
        let tags = store.book_tags(2767052).await.unwrap();
        let names: Vec<(&str, i64)> = tags
            .iter()
            .map(|stored| (stored.document.tag_name.as_str(), stored.document.count))
            .collect();
        assert_eq!(names, vec![("to-read", 9000), ("dystopia", 500)]);

        assert!(store.book_tags(99).await.unwrap().is_empty());
    }

    #[tokio::test]
    /// Tests tag popularity counts association rows and keeps unused tags
    async fn test_tag_popularity() {
        let store = seeded_store().await;
        let ranked = store.tag_popularity(Window::all()).await.unwrap();
        let counts: Vec<(i64, u64)> = ranked
            .iter()
            .map(|stored| (stored.document.tag_id, stored.document.book_count))
            .collect();
        assert_eq!(counts, vec![(12, 3), (10, 2), (11, 1), (13, 0)]);

        let second_page = store
            .tag_popularity(Window {
                skip: 2,
                limit: Some(2),
            })
            .await
            .unwrap();
        assert_eq!(second_page.len(), 2);
        assert_eq!(second_page[0].document.tag_id, 11);
    }

    #[tokio::test]
    /// Tests rating upsert
    /// 1. New pair is created
    /// 2. Same pair is updated and replaced, never duplicated
    /// 3. Rating aggregations see the final value only
    async fn test_upsert_rating() {
        let store = seeded_store().await;
        let before = store.count_documents(Collection::Ratings).await.unwrap();

        let rating = Rating {
            user_id: 999,
            book_id: 4,
            rating: 5,
        };
        assert_eq!(
            store.upsert_rating(rating.clone()).await.unwrap(),
            UpsertStatus::Created
        );
        assert_eq!(
            store.upsert_rating(rating.clone()).await.unwrap(),
            UpsertStatus::Updated
        );
        assert_eq!(
            store
                .upsert_rating(Rating {
                    rating: 2,
                    ..rating
                })
                .await
                .unwrap(),
            UpsertStatus::Updated
        );

        assert_eq!(
            store.count_documents(Collection::Ratings).await.unwrap(),
            before + 1
        );
        let counts = store.rating_counts(4).await.unwrap();
        assert_eq!(counts, BTreeMap::from([(2, 1)]));
        assert_eq!(
            store.rated_book_ids(999, Some(4)).await.unwrap(),
            Vec::<BookId>::default()
        );
        assert_eq!(store.rated_book_ids(999, None).await.unwrap(), vec![4]);
    }

    #[tokio::test]
    /// Tests that a malformed document leaves the collection untouched
    async fn test_replace_collection_is_all_or_nothing() {
        let store = seeded_store().await;
        let result = store
            .replace_collection(
                Collection::Tags,
                vec![
                    json!({"tag_id": 1, "tag_name": "fine"}),
                    json!({"tag_id": "not a number"}),
                ],
            )
            .await;
        assert!(matches!(result, Err(StoreError::DeserializationError(..))));
        assert_eq!(store.count_documents(Collection::Tags).await.unwrap(), 4);

        let inserted = store
            .replace_collection(Collection::Tags, vec![json!({"tag_id": 1, "tag_name": "fine"})])
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(store.count_documents(Collection::Tags).await.unwrap(), 1);
    }

    #[tokio::test]
    /// Tests that replace keeps the unique keys of the collection
    /// 1. Ratings with a repeated (user_id, book_id) pair are rejected, old ratings stay
    /// 2. Books with a repeated book_id and to_read with a repeated pair are rejected
    /// 3. Book tags have no unique key and accept repeated pairs
    /// 4. After a valid replace an upsert leaves exactly one value for the pair
    async fn test_replace_collection_rejects_duplicate_keys() {
        let store = seeded_store().await;

        let result = store
            .replace_collection(
                Collection::Ratings,
                vec![
                    json!({"user_id": 1, "book_id": 1, "rating": 5}),
                    json!({"user_id": 1, "book_id": 1, "rating": 2}),
                ],
            )
            .await;
        assert!(matches!(result, Err(StoreError::Other(..))));
        assert_eq!(store.count_documents(Collection::Ratings).await.unwrap(), 5);

        let result = store
            .replace_collection(
                Collection::Books,
                vec![
                    json!({"book_id": 1, "goodreads_book_id": 1, "title": "A", "authors": "X",
                           "average_rating": 4.0, "ratings_count": 1, "original_publication_year": null}),
                    json!({"book_id": 1, "goodreads_book_id": 2, "title": "B", "authors": "Y",
                           "average_rating": 3.0, "ratings_count": 1, "original_publication_year": null}),
                ],
            )
            .await;
        assert!(matches!(result, Err(StoreError::Other(..))));
        assert_eq!(store.count_documents(Collection::Books).await.unwrap(), 5);

        let result = store
            .replace_collection(
                Collection::ToRead,
                vec![
                    json!({"user_id": 1, "book_id": 4}),
                    json!({"user_id": 1, "book_id": 4}),
                ],
            )
            .await;
        assert!(matches!(result, Err(StoreError::Other(..))));

        let inserted = store
            .replace_collection(
                Collection::BookTags,
                vec![
                    json!({"goodreads_book_id": 3, "tag_id": 11, "count": 1}),
                    json!({"goodreads_book_id": 3, "tag_id": 11, "count": 2}),
                ],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        store
            .replace_collection(
                Collection::Ratings,
                vec![json!({"user_id": 1, "book_id": 1, "rating": 5})],
            )
            .await
            .unwrap();
        assert_eq!(
            store
                .upsert_rating(Rating {
                    user_id: 1,
                    book_id: 1,
                    rating: 4
                })
                .await
                .unwrap(),
            UpsertStatus::Updated
        );
        assert_eq!(
            store.rating_counts(1).await.unwrap(),
            BTreeMap::from([(4, 1)])
        );
    }
}
