//! `GET /`: the single-page UI.

use axum::response::Html;

const INDEX_HTML: &str = include_str!("../../../resources/index.html");

pub async fn page() -> Html<&'static str> {
    Html(INDEX_HTML)
}
