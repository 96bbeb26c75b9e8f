use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::{handlers, state::AppState};

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/comments", get(handlers::list_comments).post(handlers::post_comment))
        .route("/api/comments/form", get(handlers::comment_form))
        .route("/api/comments/feed", get(handlers::comment_feed))
        .route(
            "/api/comments/:id",
            get(handlers::get_comment)
                .patch(handlers::edit_comment)
                .delete(handlers::delete_comment),
        )
        .route("/api/comments/:id/flag", post(handlers::flag_comment))
        .route("/api/comments/:id/approve", post(handlers::approve_comment))
        .route("/api/comments/:id/remove", post(handlers::remove_comment))
        .with_state(state)
        .layer(cors)
}
