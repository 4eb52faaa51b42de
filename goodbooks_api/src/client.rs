use anyhow::{anyhow, bail, Context};
use reqwest::{StatusCode, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::RetryTransientMiddleware;
use reqwest_tracing::TracingMiddleware;
use serde::de::DeserializeOwned;

use crate::api::{
    Book, BookId, BookTagCount, Document, ErrorResponse, HealthResponse, ListBooksParams,
    MetricsResponse, PaginatedResponse, PaginationParams, Rating, RatingSummary,
    RecommendationParams, Recommendations, TagPopularity, UpsertRatingResponse, UserId,
};

const API_KEY_HEADER: &str = "X-API-Key";

pub struct GoodbooksClient {
    url: Url,
    api_key: Option<String>,
    client: ClientWithMiddleware,
}

impl GoodbooksClient {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .build()
            .context("Failed to build reqwest client")?;
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(reqwest_client)
            // Insert the tracing middleware
            .with(TracingMiddleware::default())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            url: Url::parse(url).context("Invalid service url")?,
            api_key: None,
            client,
        })
    }

    /// Key sent with calls that modify data
    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    /// Path segments are percent encoded, so author names may hold any character
    fn endpoint(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Service url cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &impl serde::Serialize,
    ) -> anyhow::Result<Option<T>> {
        let response = self.client.get(url.clone()).query(query).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            bail!("GET {} failed {}", url, error_detail(response).await)
        }
        Ok(Some(response.json().await?))
    }

    async fn get_existing<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &impl serde::Serialize,
    ) -> anyhow::Result<T> {
        self.get(url.clone(), query)
            .await?
            .with_context(|| format!("GET {} answered not found", url))
    }

    /// Calls GET /healthz endpoint
    pub async fn health(&self) -> anyhow::Result<HealthResponse> {
        self.get_existing(self.endpoint(&["healthz"])?, &()).await
    }

    /// Calls GET /metrics endpoint
    pub async fn metrics(&self) -> anyhow::Result<MetricsResponse> {
        self.get_existing(self.endpoint(&["metrics"])?, &()).await
    }

    /// Calls GET /books endpoint
    pub async fn list_books(
        &self,
        params: &ListBooksParams,
    ) -> anyhow::Result<PaginatedResponse<Document<Book>>> {
        self.get_existing(self.endpoint(&["books"])?, params).await
    }

    /// Calls GET /books/{book_id} endpoint
    /// Returns None if book does not exist
    pub async fn get_book(&self, book_id: BookId) -> anyhow::Result<Option<Document<Book>>> {
        self.get(self.endpoint(&["books", &book_id.to_string()])?, &())
            .await
    }

    /// Calls GET /books/{book_id}/tags endpoint
    /// Returns None if book does not exist
    pub async fn get_book_tags(
        &self,
        book_id: BookId,
    ) -> anyhow::Result<Option<Vec<Document<BookTagCount>>>> {
        self.get(
            self.endpoint(&["books", &book_id.to_string(), "tags"])?,
            &(),
        )
        .await
    }

    /// Calls GET /books/{book_id}/ratings/summary endpoint
    /// Returns None if book does not exist
    pub async fn get_ratings_summary(
        &self,
        book_id: BookId,
    ) -> anyhow::Result<Option<RatingSummary>> {
        self.get(
            self.endpoint(&["books", &book_id.to_string(), "ratings", "summary"])?,
            &(),
        )
        .await
    }

    /// Calls GET /authors/{author_name}/books endpoint
    pub async fn get_author_books(
        &self,
        author_name: &str,
        params: &PaginationParams,
    ) -> anyhow::Result<PaginatedResponse<Document<Book>>> {
        self.get_existing(self.endpoint(&["authors", author_name, "books"])?, params)
            .await
    }

    /// Calls GET /tags endpoint
    pub async fn list_tags(
        &self,
        params: &PaginationParams,
    ) -> anyhow::Result<PaginatedResponse<Document<TagPopularity>>> {
        self.get_existing(self.endpoint(&["tags"])?, params).await
    }

    /// Calls GET /users/{user_id}/to-read endpoint
    pub async fn get_user_to_read(&self, user_id: UserId) -> anyhow::Result<Vec<Document<Book>>> {
        self.get_existing(
            self.endpoint(&["users", &user_id.to_string(), "to-read"])?,
            &(),
        )
        .await
    }

    /// Calls GET /users/{user_id}/recommendations endpoint
    pub async fn get_recommendations(
        &self,
        user_id: UserId,
        params: &RecommendationParams,
    ) -> anyhow::Result<Recommendations> {
        self.get_existing(
            self.endpoint(&["users", &user_id.to_string(), "recommendations"])?,
            params,
        )
        .await
    }

    /// Calls POST /ratings endpoint with the configured api key
    pub async fn upsert_rating(&self, rating: &Rating) -> anyhow::Result<UpsertRatingResponse> {
        let api_key = self
            .api_key
            .as_deref()
            .context("Api key is required to upsert ratings")?;
        let response = self
            .client
            .post(self.endpoint(&["ratings"])?)
            .header(API_KEY_HEADER, api_key)
            .json(rating)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("Failed to upsert rating {}", error_detail(response).await)
        }
        Ok(response.json().await?)
    }
}

async fn error_detail(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<ErrorResponse>().await {
        Ok(error) => format!("{}: {}", status, error.detail),
        Err(_) => status.to_string(),
    }
}

#[cfg(test)]
mod client_tests {
    use super::*;

    #[test]
    fn test_endpoint_encoding() {
        let client = GoodbooksClient::new("http://localhost:8080/").unwrap();
        assert_eq!(
            client
                .endpoint(&["authors", "J.K. Rowling", "books"])
                .unwrap()
                .as_str(),
            "http://localhost:8080/authors/J.K.%20Rowling/books"
        );
        assert_eq!(
            client.endpoint(&["books", "7", "ratings", "summary"]).unwrap().as_str(),
            "http://localhost:8080/books/7/ratings/summary"
        );
    }
}
