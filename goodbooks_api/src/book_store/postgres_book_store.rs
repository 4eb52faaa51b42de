use std::collections::BTreeMap;

use anyhow::Context;
use serde_json::json;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row, Statement};

use crate::api::{
    Book, BookId, BookSortField, BookTagCount, Rating, SortOrder, TagPopularity, UpsertStatus,
    UserId,
};
use crate::book_store::{
    BookFilter, BookSort, BookStore, Collection, Stored, StoreError, Window,
};

/// Indexes of every collection, rebuilt after each bulk load
const INDEXES: &str = "
    CREATE INDEX IF NOT EXISTS books_title_authors_idx ON books ((params->>'title'), (params->>'authors'));
    CREATE INDEX IF NOT EXISTS books_average_rating_idx ON books (((params->>'average_rating')::float8) DESC);
    CREATE UNIQUE INDEX IF NOT EXISTS books_book_id_idx ON books (((params->>'book_id')::bigint));
    CREATE INDEX IF NOT EXISTS ratings_book_id_idx ON ratings (((params->>'book_id')::bigint));
    CREATE UNIQUE INDEX IF NOT EXISTS ratings_user_book_idx ON ratings (((params->>'user_id')::bigint), ((params->>'book_id')::bigint));
    CREATE UNIQUE INDEX IF NOT EXISTS tags_tag_id_idx ON tags (((params->>'tag_id')::bigint));
    CREATE INDEX IF NOT EXISTS tags_tag_name_idx ON tags ((params->>'tag_name'));
    CREATE INDEX IF NOT EXISTS book_tags_tag_id_idx ON book_tags (((params->>'tag_id')::bigint));
    CREATE INDEX IF NOT EXISTS book_tags_goodreads_book_id_idx ON book_tags (((params->>'goodreads_book_id')::bigint));
    CREATE UNIQUE INDEX IF NOT EXISTS to_read_user_book_idx ON to_read (((params->>'user_id')::bigint), ((params->>'book_id')::bigint));
";

pub struct PostgresBookStore {
    client: Client,
}

pub struct PostgresBookStoreConfig {
    pub hostname: String,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl PostgresBookStore {
    pub async fn init(config: PostgresBookStoreConfig) -> anyhow::Result<Self> {
        let connection_str = format!(
            "postgresql://{}:{}@{}/{}",
            config.username, config.password, config.hostname, config.database
        );
        tracing::info!(
            "Postgres connection: {}@{}/{}",
            config.username,
            config.hostname,
            config.database
        );
        let (client, connection) = tokio_postgres::connect(&connection_str, NoTls)
            .await
            .context("Failed to start postgres")?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("connection error: {}", e);
            }
        });

        for collection in Collection::ALL {
            client
                .batch_execute(&format!(
                    "
        CREATE TABLE IF NOT EXISTS {} (
            id              BIGSERIAL PRIMARY KEY,
            params          JSONB NOT NULL
            )
        ",
                    collection.name()
                ))
                .await
                .with_context(|| format!("Failed to setup {} table", collection))?;
        }

        client
            .batch_execute(INDEXES)
            .await
            .context("Failed to setup indexes")?;

        Ok(Self { client })
    }
}

/// Numbered placeholders and their values for a WHERE clause built from a BookFilter
#[derive(Default)]
struct SqlFilter {
    clauses: Vec<String>,
    values: Vec<Box<dyn ToSql + Sync + Send>>,
}

impl SqlFilter {
    fn from_book_filter(filter: &BookFilter) -> Self {
        let mut sql = Self::default();
        if let Some(text) = &filter.text {
            let placeholder = sql.bind(like_pattern(text));
            sql.clauses.push(format!(
                "(params->>'title' ILIKE {placeholder} OR params->>'authors' ILIKE {placeholder})"
            ));
        }
        if let Some(author) = &filter.author {
            let placeholder = sql.bind(like_pattern(author));
            sql.clauses
                .push(format!("params->>'authors' ILIKE {placeholder}"));
        }
        if let Some(min_average_rating) = filter.min_average_rating {
            let placeholder = sql.bind(min_average_rating);
            sql.clauses.push(format!(
                "(params->>'average_rating')::float8 >= {placeholder}"
            ));
        }
        if let Some(year_from) = filter.year_from {
            let placeholder = sql.bind(year_from);
            sql.clauses.push(format!(
                "(params->>'original_publication_year')::int >= {placeholder}"
            ));
        }
        if let Some(year_to) = filter.year_to {
            let placeholder = sql.bind(year_to);
            sql.clauses.push(format!(
                "(params->>'original_publication_year')::int <= {placeholder}"
            ));
        }
        if let Some(book_ids) = &filter.book_ids {
            let placeholder = sql.bind(book_ids.clone());
            sql.clauses
                .push(format!("(params->>'book_id')::bigint = ANY({placeholder})"));
        }
        if !filter.excluded_book_ids.is_empty() {
            let placeholder = sql.bind(filter.excluded_book_ids.clone());
            sql.clauses.push(format!(
                "NOT ((params->>'book_id')::bigint = ANY({placeholder}))"
            ));
        }
        sql
    }

    /// Adds a value and returns its placeholder
    fn bind<T: ToSql + Sync + Send + 'static>(&mut self, value: T) -> String {
        self.values.push(Box::new(value));
        format!("${}", self.values.len())
    }

    fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }

    fn window_clause(&mut self, window: Window) -> String {
        let offset = self.bind(i64::try_from(window.skip).unwrap_or(i64::MAX));
        match window.limit {
            Some(limit) => {
                let limit = self.bind(limit as i64);
                format!("OFFSET {offset} LIMIT {limit}")
            }
            None => format!("OFFSET {offset}"),
        }
    }

    fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.values
            .iter()
            .map(|value| value.as_ref() as &(dyn ToSql + Sync))
            .collect()
    }
}

/// Case insensitive substring pattern, LIKE wildcards in the input match literally
fn like_pattern(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// Sort keys come from a closed set, no user input reaches the ORDER BY clause
fn order_by_clause(sort: Option<BookSort>) -> String {
    let Some(sort) = sort else {
        return "ORDER BY id ASC".to_string();
    };
    let field = match sort.field {
        BookSortField::Avg => "(params->>'average_rating')::float8",
        BookSortField::RatingsCount => "(params->>'ratings_count')::bigint",
        BookSortField::Year => "(params->>'original_publication_year')::int",
        BookSortField::Title => "(params->>'title') COLLATE \"C\"",
    };
    // Missing values are the lowest, as in a document store
    let direction = match sort.order {
        SortOrder::Asc => "ASC NULLS FIRST",
        SortOrder::Desc => "DESC NULLS LAST",
    };
    format!("ORDER BY {field} {direction}, id ASC")
}

fn stored_book(row: &Row) -> Result<Stored<Book>, StoreError> {
    let id = row.try_get(0)?;
    let params: serde_json::Value = row.try_get(1)?;
    Ok(Stored {
        id,
        document: serde_json::from_value(params)?,
    })
}

#[async_trait::async_trait]
impl BookStore for PostgresBookStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn count_documents(&self, collection: Collection) -> Result<u64, StoreError> {
        let stmt: Statement = self
            .client
            .prepare(&format!("SELECT COUNT(*) FROM {}", collection.name()))
            .await?;
        let count: i64 = self.client.query_one(&stmt, &[]).await?.try_get(0)?;
        Ok(count as u64)
    }

    async fn count_books(&self, filter: &BookFilter) -> Result<u64, StoreError> {
        let sql = SqlFilter::from_book_filter(filter);
        let stmt: Statement = self
            .client
            .prepare(&format!("SELECT COUNT(*) FROM books {}", sql.where_clause()))
            .await?;
        let count: i64 = self
            .client
            .query_one(&stmt, &sql.params())
            .await?
            .try_get(0)?;
        Ok(count as u64)
    }

    async fn find_books(
        &self,
        filter: &BookFilter,
        sort: Option<BookSort>,
        window: Window,
    ) -> Result<Vec<Stored<Book>>, StoreError> {
        let mut sql = SqlFilter::from_book_filter(filter);
        let where_clause = sql.where_clause();
        let window_clause = sql.window_clause(window);
        let stmt: Statement = self
            .client
            .prepare(&format!(
                "SELECT id, params FROM books {} {} {}",
                where_clause,
                order_by_clause(sort),
                window_clause
            ))
            .await?;

        let rows = self.client.query(&stmt, &sql.params()).await?;
        rows.iter().map(stored_book).collect()
    }

    async fn find_book(&self, book_id: BookId) -> Result<Option<Stored<Book>>, StoreError> {
        let stmt: Statement = self
            .client
            .prepare("SELECT id, params FROM books WHERE (params->>'book_id')::bigint = $1 LIMIT 1")
            .await?;

        let rows = self.client.query(&stmt, &[&book_id]).await?;
        rows.first().map(stored_book).transpose()
    }

    async fn book_tags(
        &self,
        goodreads_book_id: i64,
    ) -> Result<Vec<Stored<BookTagCount>>, StoreError> {
        let stmt: Statement = self
            .client
            .prepare(
                "
        SELECT bt.id,
               (bt.params->>'tag_id')::bigint,
               t.params->>'tag_name',
               (bt.params->>'count')::bigint
        FROM book_tags bt
        JOIN tags t ON (t.params->>'tag_id')::bigint = (bt.params->>'tag_id')::bigint
        WHERE (bt.params->>'goodreads_book_id')::bigint = $1
        ORDER BY (bt.params->>'count')::bigint DESC NULLS LAST, bt.id ASC
        ",
            )
            .await?;

        let rows = self.client.query(&stmt, &[&goodreads_book_id]).await?;
        rows.iter()
            .map(|row| {
                Ok(Stored {
                    id: row.try_get(0)?,
                    document: BookTagCount {
                        tag_id: row.try_get(1)?,
                        tag_name: row.try_get(2)?,
                        count: row.try_get(3)?,
                    },
                })
            })
            .collect()
    }

    async fn tag_popularity(
        &self,
        window: Window,
    ) -> Result<Vec<Stored<TagPopularity>>, StoreError> {
        let mut sql = SqlFilter::default();
        let window_clause = sql.window_clause(window);
        // Counts association rows, not distinct books
        let stmt: Statement = self
            .client
            .prepare(&format!(
                "
        SELECT t.id,
               (t.params->>'tag_id')::bigint,
               t.params->>'tag_name',
               (SELECT COUNT(*) FROM book_tags bt
                WHERE (bt.params->>'tag_id')::bigint = (t.params->>'tag_id')::bigint) AS book_count
        FROM tags t
        ORDER BY book_count DESC, t.id ASC
        {window_clause}
        "
            ))
            .await?;

        let rows = self.client.query(&stmt, &sql.params()).await?;
        rows.iter()
            .map(|row| {
                let book_count: i64 = row.try_get(3)?;
                Ok(Stored {
                    id: row.try_get(0)?,
                    document: TagPopularity {
                        tag_id: row.try_get(1)?,
                        tag_name: row.try_get(2)?,
                        book_count: book_count as u64,
                    },
                })
            })
            .collect()
    }

    async fn to_read_book_ids(&self, user_id: UserId) -> Result<Vec<BookId>, StoreError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT (params->>'book_id')::bigint FROM to_read \
                 WHERE (params->>'user_id')::bigint = $1 ORDER BY id",
            )
            .await?;
        let rows = self.client.query(&stmt, &[&user_id]).await?;
        rows.iter().map(|row| Ok(row.try_get(0)?)).collect()
    }

    async fn rating_counts(&self, book_id: BookId) -> Result<BTreeMap<i64, u64>, StoreError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT (params->>'rating')::bigint, COUNT(*) FROM ratings \
                 WHERE (params->>'book_id')::bigint = $1 GROUP BY 1",
            )
            .await?;
        let rows = self.client.query(&stmt, &[&book_id]).await?;
        rows.iter()
            .map(|row| {
                let rating: i64 = row.try_get(0)?;
                let count: i64 = row.try_get(1)?;
                Ok((rating, count as u64))
            })
            .collect()
    }

    async fn rated_book_ids(
        &self,
        user_id: UserId,
        min_rating: Option<i64>,
    ) -> Result<Vec<BookId>, StoreError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT DISTINCT (params->>'book_id')::bigint FROM ratings \
                 WHERE (params->>'user_id')::bigint = $1 \
                 AND ($2::bigint IS NULL OR (params->>'rating')::bigint >= $2)",
            )
            .await?;
        let rows = self.client.query(&stmt, &[&user_id, &min_rating]).await?;
        rows.iter().map(|row| Ok(row.try_get(0)?)).collect()
    }

    async fn upsert_rating(&self, rating: Rating) -> Result<UpsertStatus, StoreError> {
        // xmax is zero only for a freshly inserted row
        let stmt: Statement = self
            .client
            .prepare(
                "
        INSERT INTO ratings (params) VALUES ($1)
        ON CONFLICT (((params->>'user_id')::bigint), ((params->>'book_id')::bigint))
        DO UPDATE SET params = EXCLUDED.params
        RETURNING (xmax = 0)
        ",
            )
            .await?;

        let row = self.client.query_one(&stmt, &[&json!(rating)]).await?;
        let inserted: bool = row.try_get(0)?;
        Ok(if inserted {
            UpsertStatus::Created
        } else {
            UpsertStatus::Updated
        })
    }

    async fn replace_collection(
        &self,
        collection: Collection,
        documents: Vec<serde_json::Value>,
    ) -> Result<u64, StoreError> {
        // Single statement, so the delete and the insert commit together.
        // The count forces the delete to finish before the first insert
        let stmt: Statement = self
            .client
            .prepare(&format!(
                "
        WITH cleared AS (DELETE FROM {table} RETURNING 1)
        INSERT INTO {table} (params)
        SELECT value FROM jsonb_array_elements($1::jsonb)
        WHERE (SELECT COUNT(*) FROM cleared) >= 0
        ",
                table = collection.name()
            ))
            .await?;

        let inserted = self
            .client
            .execute(&stmt, &[&serde_json::Value::Array(documents)])
            .await?;
        Ok(inserted)
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        self.client.batch_execute(INDEXES).await?;
        Ok(())
    }
}
