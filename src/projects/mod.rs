use axum::Router;

use crate::state::AppState;

mod dto;
pub mod handlers;
pub(crate) mod repo;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
