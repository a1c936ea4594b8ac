use axum::extract::OriginalUri;
use axum::http::header::LOCATION;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};

use crate::error::{Error, ErrorDetails};

const REFINE_PATH: &str = "/api/refine";

pub async fn handle_404(OriginalUri(uri): OriginalUri) -> Error {
    Error::new(ErrorDetails::RouteNotFound {
        path: uri.path().to_string(),
    })
}

/// `POST /api/groom` keeps its method and body on the way to `/api/refine`.
pub async fn groom_post_redirect() -> Redirect {
    Redirect::temporary(REFINE_PATH)
}

/// `Redirect::permanent` answers 308; browsers and old bookmarks expect 301 here.
pub async fn groom_get_redirect() -> Response {
    (StatusCode::MOVED_PERMANENTLY, [(LOCATION, REFINE_PATH)]).into_response()
}
