pub mod health;
pub mod reply;

use axum::Router;

use crate::state::AppState;

pub fn configure(state: AppState) -> Router {
    Router::new()
        .merge(health::routes())
        .merge(reply::routes(state))
}
