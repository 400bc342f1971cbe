//! Public read access to stored photo blobs. When running locally this is
//! what the media API fetches `sourceUrl` from.

use crate::{errors::AppError, models::blob::BlobObject, state::AppState};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};

/// GET `/blobs/{bucket}/{*key}`
pub async fn get_blob(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (meta, content) = state.blobs.get(&bucket, &key).await?;
    let length = content.len() as i64;

    let mut response = Response::new(Body::from(content));
    *response.status_mut() = StatusCode::OK;
    set_blob_headers(response.headers_mut(), &meta, length);

    Ok(response)
}

/// HEAD `/blobs/{bucket}/{*key}` - same headers as GET but no body.
pub async fn head_blob(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let meta = state.blobs.head(&bucket, &key).await?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_blob_headers(response.headers_mut(), &meta, meta.size_bytes);

    Ok(response)
}

fn set_blob_headers(headers: &mut HeaderMap, meta: &BlobObject, length: i64) {
    let content_type = meta
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length.max(0)));

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.etag)) {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        routes::routes::routes,
        services::{
            blob_store::BlobStore,
            media_api::MockMediaApi,
            test_support::{BUCKET, Pipeline, granting_tokens},
        },
    };
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode, header},
    };
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn get_returns_the_stored_bytes_with_metadata_headers() {
        let pipeline = Pipeline::new().await;
        let payload = Bytes::from_static(b"\x89PNG fake image");
        let key = "local-seo-photos/uploads/dc/1-a.png";
        let stored = pipeline
            .blobs
            .put(BUCKET, key, payload.clone(), Some("image/png"))
            .await
            .unwrap();
        let app = routes().with_state(pipeline.app_state(MockMediaApi::new(), granting_tokens()));

        let response = app
            .oneshot(
                Request::get(format!("/blobs/{}/{}", BUCKET, key))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(
            response.headers()[header::ETAG],
            format!("\"{}\"", stored.etag).as_str()
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, payload);
    }

    #[tokio::test]
    async fn head_reports_length_without_a_body() {
        let pipeline = Pipeline::new().await;
        let key = "local-seo-photos/processed/dc/1-a.jpg";
        pipeline
            .blobs
            .put(BUCKET, key, Bytes::from(vec![7u8; 2048]), Some("image/jpeg"))
            .await
            .unwrap();
        let app = routes().with_state(pipeline.app_state(MockMediaApi::new(), granting_tokens()));

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::HEAD)
                    .uri(format!("/blobs/{}/{}", BUCKET, key))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "2048");
    }

    #[tokio::test]
    async fn missing_blob_is_a_404() {
        let pipeline = Pipeline::new().await;
        let app = routes().with_state(pipeline.app_state(MockMediaApi::new(), granting_tokens()));

        let response = app
            .oneshot(
                Request::get(format!("/blobs/{}/local-seo-photos/uploads/nope.jpg", BUCKET))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
