use std::sync::Arc;

use log::{debug, error};
use serde::Deserialize;
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::ApiError;
use crate::enrichment::Enricher;
use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::RecordStorage;

/// Document shape requested through `?view=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Full,
    Basic,
}

#[derive(Debug, Default, Deserialize)]
pub struct ViewQuery {
    pub view: Option<String>,
}

impl ViewQuery {
    pub fn parse(&self) -> Option<View> {
        match self.view.as_deref() {
            None | Some("") | Some("full") => Some(View::Full),
            Some("basic") => Some(View::Basic),
            Some(_) => None,
        }
    }
}

fn error_reply(status: StatusCode, message: String) -> reply::Response {
    reply::with_status(reply::json(&ApiError { message }), status).into_response()
}

fn storage_error_reply(err: StorageError) -> reply::Response {
    let status = match err {
        StorageError::InvalidKey(_) => StatusCode::BAD_REQUEST,
        StorageError::NotFound(_) => StatusCode::NOT_FOUND,
        StorageError::ConnectionFailed | StorageError::ReadFailed => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_reply(status, err.to_string())
}

/// GET /
pub fn index_route() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path::end()
        .and(warp::get())
        .and_then(|| async move { Ok::<_, Rejection>(reply::html("crs-offline is running")) })
}

/// GET /records
pub fn list_records_route(
    storage: Arc<dyn RecordStorage>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("records")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(move || {
            let storage = storage.clone();
            async move { Ok::<_, Rejection>(list_records(storage.as_ref())) }
        })
}

/// GET /ecs/files/{key}
pub fn enrich_file_route(
    storage: Arc<dyn RecordStorage>,
    enricher: Arc<Enricher>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("ecs" / "files" / ..)
        .and(warp::path::tail())
        .and(warp::get())
        .and(warp::query::<ViewQuery>())
        .and_then(move |key: warp::path::Tail, query: ViewQuery| {
            let storage = storage.clone();
            let enricher = enricher.clone();
            async move {
                Ok::<_, Rejection>(
                    enrich_file(key.as_str(), &query, storage.as_ref(), enricher.as_ref()).await,
                )
            }
        })
}

pub fn list_records(storage: &dyn RecordStorage) -> reply::Response {
    match storage.list_records() {
        Ok(keys) => reply::with_status(reply::json(&keys), StatusCode::OK).into_response(),
        Err(e) => {
            error!("Failed to list records: {}", e);
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list records".to_string())
        }
    }
}

/// Inspects the stored record `key` and replies with its document.
pub async fn enrich_file(
    key: &str,
    query: &ViewQuery,
    storage: &dyn RecordStorage,
    enricher: &Enricher,
) -> reply::Response {
    let view = match query.parse() {
        Some(view) => view,
        None => {
            return error_reply(
                StatusCode::BAD_REQUEST,
                format!("Unknown view {:?}", query.view.as_deref().unwrap_or_default()),
            )
        }
    };
    let record = match storage.open_record(key) {
        Ok(record) => record,
        Err(e) => {
            debug!("Record {} unavailable: {}", key, e);
            return storage_error_reply(e);
        }
    };

    match enricher.enrich_record(record).await {
        Ok(doc) => match view {
            View::Full => reply::json(&doc).into_response(),
            View::Basic => reply::json(&doc.basic_view()).into_response(),
        },
        Err(e) => {
            error!("Failed to enrich {}: {}", key, e);
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::Config;
    use crate::storage::FileStorage;
    use std::fs;
    use tempfile::TempDir;

    const RECORD: &str = "GET /?q=1 HTTP/1.1\r\nHost: a.example\r\n\r\n\
        HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nok";

    fn setup() -> (TempDir, FileStorage, Enricher) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("ok.http"), RECORD).unwrap();
        fs::write(dir.path().join("broken.http"), "not http at all\r\n\r\n").unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let enricher = Enricher::from_config(&Config::default()).unwrap();
        (dir, storage, enricher)
    }

    fn query(view: Option<&str>) -> ViewQuery {
        ViewQuery {
            view: view.map(str::to_string),
        }
    }

    #[test]
    fn test_view_query() {
        assert_eq!(query(None).parse(), Some(View::Full));
        assert_eq!(query(Some("full")).parse(), Some(View::Full));
        assert_eq!(query(Some("basic")).parse(), Some(View::Basic));
        assert_eq!(query(Some("raw")).parse(), None);
    }

    #[tokio::test]
    async fn test_enrich_file_status_codes() {
        let (_dir, storage, enricher) = setup();

        let res = enrich_file("ok.http", &query(None), &storage, &enricher).await;
        assert_eq!(res.status(), StatusCode::OK);
        let res = enrich_file("ok.http", &query(Some("basic")), &storage, &enricher).await;
        assert_eq!(res.status(), StatusCode::OK);
        let res = enrich_file("ok.http", &query(Some("raw")), &storage, &enricher).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = enrich_file("missing.http", &query(None), &storage, &enricher).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let res = enrich_file("../ok.http", &query(None), &storage, &enricher).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let res = enrich_file("broken.http", &query(None), &storage, &enricher).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_list_records_reply() {
        let (_dir, storage, _) = setup();
        assert_eq!(list_records(&storage).status(), StatusCode::OK);
    }
}
