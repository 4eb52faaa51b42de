use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::api::{Book, BookTag, Rating, Tag, ToRead};
use crate::book_store::{BookStore, Collection, InMemoryBookStore};

pub const DEFAULT_BASE_URL: &str =
    "https://raw.githubusercontent.com/zygmuntz/goodbooks-10k/master/samples/";

/// Where the `<collection>.csv` files are read from
#[derive(Debug, Clone)]
pub enum CsvSource {
    Remote(reqwest::Url),
    Local(PathBuf),
}

impl CsvSource {
    pub fn remote(base_url: &str) -> anyhow::Result<Self> {
        let base_url = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        Ok(CsvSource::Remote(
            reqwest::Url::parse(&base_url).context("Invalid base url")?,
        ))
    }

    pub async fn fetch(&self, collection: Collection) -> anyhow::Result<String> {
        let file_name = format!("{}.csv", collection.name());
        match self {
            CsvSource::Remote(base_url) => {
                let url = base_url.join(&file_name)?;
                let response = reqwest::get(url.clone()).await?.error_for_status()?;
                response
                    .text()
                    .await
                    .with_context(|| format!("Failed to read {}", url))
            }
            CsvSource::Local(dir) => {
                let path = dir.join(&file_name);
                tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))
            }
        }
    }
}

/// Row of books.csv, the publication year is written as a float such as `2008.0`
#[derive(Debug, Deserialize)]
struct BookRecord {
    book_id: i64,
    goodreads_book_id: i64,
    title: String,
    authors: String,
    average_rating: f64,
    ratings_count: i64,
    original_publication_year: Option<f64>,
    original_title: Option<String>,
    isbn: Option<String>,
    language_code: Option<String>,
    image_url: Option<String>,
    small_image_url: Option<String>,
}

impl From<BookRecord> for Book {
    fn from(record: BookRecord) -> Self {
        Book {
            book_id: record.book_id,
            goodreads_book_id: record.goodreads_book_id,
            title: record.title,
            authors: record.authors,
            average_rating: record.average_rating,
            ratings_count: record.ratings_count,
            original_publication_year: record
                .original_publication_year
                .filter(|year| year.is_finite())
                .map(|year| year as i32),
            original_title: record.original_title,
            isbn: record.isbn,
            language_code: record.language_code,
            image_url: record.image_url,
            small_image_url: record.small_image_url,
        }
    }
}

fn parse_records<R, T>(body: &str) -> anyhow::Result<Vec<serde_json::Value>>
where
    R: DeserializeOwned + Into<T>,
    T: Serialize,
{
    let mut reader = csv::Reader::from_reader(body.as_bytes());
    reader
        .deserialize::<R>()
        .enumerate()
        .map(|(index, record)| {
            let record = record.with_context(|| format!("Invalid record {}", index + 1))?;
            Ok(serde_json::to_value(record.into())?)
        })
        .collect()
}

/// Parses the csv body into documents of the collection
pub fn parse_documents(
    collection: Collection,
    body: &str,
) -> anyhow::Result<Vec<serde_json::Value>> {
    match collection {
        Collection::Books => parse_records::<BookRecord, Book>(body),
        Collection::Ratings => parse_records::<Rating, Rating>(body),
        Collection::Tags => parse_records::<Tag, Tag>(body),
        Collection::BookTags => parse_records::<BookTag, BookTag>(body),
        Collection::ToRead => parse_records::<ToRead, ToRead>(body),
    }
}

/// Replaces the collection with the documents parsed from body.
/// Returns the number of inserted documents
pub async fn load_collection(
    store: &dyn BookStore,
    collection: Collection,
    body: &str,
) -> anyhow::Result<u64> {
    let documents = parse_documents(collection, body)?;
    let inserted = store.replace_collection(collection, documents).await?;
    Ok(inserted)
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LoadReport {
    pub loaded: usize,
    pub total: usize,
    pub indexes_built: bool,
}

impl LoadReport {
    pub fn all_loaded(&self) -> bool {
        self.loaded == self.total
    }

    pub fn is_complete(&self) -> bool {
        self.all_loaded() && self.indexes_built
    }
}

/// Loads every collection in order, a failed collection does not stop the others.
/// Indexes are built only when everything was loaded
pub async fn load_all(store: &dyn BookStore, source: &CsvSource) -> LoadReport {
    let mut loaded = 0;
    for collection in Collection::ALL {
        tracing::info!("Loading {}", collection);
        let result = match source.fetch(collection).await {
            Ok(body) => load_collection(store, collection, &body).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(inserted) => {
                tracing::info!("Inserted {} records into {}", inserted, collection);
                loaded += 1;
            }
            Err(err) => tracing::error!("Error loading {}: {:#}", collection, err),
        }
    }

    let mut report = LoadReport {
        loaded,
        total: Collection::ALL.len(),
        indexes_built: false,
    };
    if report.all_loaded() {
        match store.ensure_indexes().await {
            Ok(()) => {
                tracing::info!("Indexes created successfully");
                report.indexes_built = true;
            }
            Err(err) => tracing::error!("Failed to create indexes {}", err),
        }
    }
    report
}

/// In-memory store filled from the csv files of data_dir, empty without one.
/// Fails unless every collection is loaded
pub async fn in_memory_store(data_dir: Option<&Path>) -> anyhow::Result<InMemoryBookStore> {
    let store = InMemoryBookStore::default();
    let Some(data_dir) = data_dir else {
        tracing::warn!("DATA_DIR is not set, in-memory store starts empty");
        return Ok(store);
    };
    tracing::info!("Seeding in-memory store from {}", data_dir.display());
    let report = load_all(&store, &CsvSource::Local(data_dir.to_path_buf())).await;
    if !report.is_complete() {
        anyhow::bail!(
            "Seeding failed, {}/{} collections loaded",
            report.loaded,
            report.total
        );
    }
    Ok(store)
}
