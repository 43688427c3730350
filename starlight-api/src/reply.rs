//! Turns a `Result<T, ApiError>` into a warp [`Reply`] with the status
//! code §4.6/§7 assigns to each error kind: 200 on success, 400 for
//! configuration/domain errors, 205 for non-retriable protocol errors (the
//! caller's task basket should drop the task), 500 for precondition and
//! transient failures.

use serde::Serialize;
use starlight_common::{ApiError, ToHttpStatus};
use warp::{http::StatusCode, reply::Reply};

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    msg: String,
}

pub fn json_result<T: Serialize>(result: Result<T, ApiError>) -> warp::reply::Response {
    match result {
        Ok(value) => {
            warp::reply::with_status(warp::reply::json(&value), StatusCode::OK).into_response()
        }
        Err(e) => {
            let status = e.to_http_status();
            let body = ErrorBody {
                code: e.kind.to_code(),
                msg: e.msg,
            };
            warp::reply::with_status(warp::reply::json(&body), status).into_response()
        }
    }
}

/// Same as [`json_result`] but for handlers that return nothing on
/// success (`POST /starlight/message`'s 200 body is just an acceptance
/// marker).
pub fn empty_result(result: Result<(), ApiError>) -> warp::reply::Response {
    match result {
        Ok(()) => warp::reply::with_status(warp::reply::json(&"accepted"), StatusCode::OK)
            .into_response(),
        Err(e) => {
            let status = e.to_http_status();
            let body = ErrorBody {
                code: e.kind.to_code(),
                msg: e.msg,
            };
            warp::reply::with_status(warp::reply::json(&body), status).into_response()
        }
    }
}
