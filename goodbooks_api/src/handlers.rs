use actix_web::web::Data;
use actix_web::{Error, HttpResponse};
use paperclip::actix::{
    api_v2_operation,
    web::{self},
};

use crate::api::{
    BookId, ErrorResponse, ListBooksParams, PaginationParams, Rating, RecommendationParams,
    RootResponse, UpsertRatingResponse, UpsertStatus, UserId,
};
use crate::auth::ApiKey;
use crate::query_service::QueryService;

#[api_v2_operation]
pub async fn health(service: Data<QueryService>) -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().json(service.health().await?))
}

#[api_v2_operation]
pub async fn metrics(service: Data<QueryService>) -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().json(service.metrics().await?))
}

#[api_v2_operation]
pub async fn root() -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().json(RootResponse {
        message: "GoodBooks API is running".to_string(),
    }))
}

#[api_v2_operation]
pub async fn list_books(
    service: Data<QueryService>,
    params: web::Query<ListBooksParams>,
) -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().json(service.list_books(params.into_inner()).await?))
}

#[api_v2_operation]
pub async fn get_book(
    service: Data<QueryService>,
    book_id: web::Path<BookId>,
) -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().json(service.get_book(book_id.into_inner()).await?))
}

#[api_v2_operation]
pub async fn get_book_tags(
    service: Data<QueryService>,
    book_id: web::Path<BookId>,
) -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().json(service.get_book_tags(book_id.into_inner()).await?))
}

#[api_v2_operation]
pub async fn get_ratings_summary(
    service: Data<QueryService>,
    book_id: web::Path<BookId>,
) -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().json(service.get_ratings_summary(book_id.into_inner()).await?))
}

#[api_v2_operation]
pub async fn get_author_books(
    service: Data<QueryService>,
    author_name: web::Path<String>,
    params: web::Query<PaginationParams>,
) -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().json(
        service
            .get_author_books(author_name.into_inner(), params.into_inner())
            .await?,
    ))
}

#[api_v2_operation]
pub async fn list_tags(
    service: Data<QueryService>,
    params: web::Query<PaginationParams>,
) -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().json(service.list_tags(params.into_inner()).await?))
}

#[api_v2_operation]
pub async fn get_user_to_read(
    service: Data<QueryService>,
    user_id: web::Path<UserId>,
) -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().json(service.get_user_to_read(user_id.into_inner()).await?))
}

#[api_v2_operation]
pub async fn get_recommendations(
    service: Data<QueryService>,
    user_id: web::Path<UserId>,
    params: web::Query<RecommendationParams>,
) -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().json(
        service
            .get_recommendations(user_id.into_inner(), params.into_inner())
            .await?,
    ))
}

/// The api key is checked before the body is looked at
#[api_v2_operation]
pub async fn upsert_rating(
    _api_key: ApiKey,
    service: Data<QueryService>,
    rating: web::Json<Rating>,
) -> Result<HttpResponse, Error> {
    let status = service.upsert_rating(rating.into_inner()).await?;
    let (mut response, message) = match status {
        UpsertStatus::Created => (HttpResponse::Created(), "Rating created successfully"),
        UpsertStatus::Updated => (HttpResponse::Ok(), "Rating updated successfully"),
    };
    Ok(response.json(UpsertRatingResponse {
        status,
        message: message.to_string(),
    }))
}

pub async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(ErrorResponse {
        detail: "Not Found".to_string(),
    })
}
