use paperclip::actix::web;

use crate::handlers;

pub fn config_app(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/healthz").route(web::get().to(handlers::health)))
        .service(web::resource("/metrics").route(web::get().to(handlers::metrics)))
        .service(web::resource("/").route(web::get().to(handlers::root)))
        .service(web::resource("/books").route(web::get().to(handlers::list_books)))
        .service(
            web::scope("/books/{book_id}")
                .service(web::resource("").route(web::get().to(handlers::get_book)))
                .service(web::resource("/tags").route(web::get().to(handlers::get_book_tags)))
                .service(
                    web::resource("/ratings/summary")
                        .route(web::get().to(handlers::get_ratings_summary)),
                ),
        )
        .service(
            web::resource("/authors/{author_name}/books")
                .route(web::get().to(handlers::get_author_books)),
        )
        .service(web::resource("/tags").route(web::get().to(handlers::list_tags)))
        .service(
            web::scope("/users/{user_id}")
                .service(
                    web::resource("/to-read").route(web::get().to(handlers::get_user_to_read)),
                )
                .service(
                    web::resource("/recommendations")
                        .route(web::get().to(handlers::get_recommendations)),
                ),
        )
        .service(web::resource("/ratings").route(web::post().to(handlers::upsert_rating)));
}
