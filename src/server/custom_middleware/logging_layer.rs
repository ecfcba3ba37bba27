use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use telemetry_batteries::tracing::{trace_from_headers, trace_to_headers};
use tracing::{error, info, info_span, warn, Instrument};

// 1 MiB
const MAX_REQUEST_BODY_SIZE: usize = 1024 * 1024;

pub async fn middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    let (parts, body) = request.into_parts();

    let uri_path = parts.uri.path().to_string();
    let request_method = parts.method.clone();
    let request_query = parts.uri.query().map(ToString::to_string);

    if let Method::GET = request_method {
        let span = info_span!("request", ?uri_path, ?request_method, ?request_query);

        async {
            trace_from_headers(&parts.headers);

            info!(uri_path, ?request_method, ?request_query, "Processing request");

            let request = Request::from_parts(parts, Body::empty());
            let response = next.run(request).await;

            let mut response =
                handle_response(&uri_path, &request_method, request_query.as_deref(), response).await?;

            trace_to_headers(response.headers_mut());

            Ok(response)
        }
        .instrument(span)
        .await
    } else {
        let body = body_to_string(body).await?;

        let span = info_span!("request", ?uri_path, ?request_method, ?request_query, ?body);

        async {
            trace_from_headers(&parts.headers);

            info!(?uri_path, ?request_method, ?request_query, ?body, "Processing request");

            let request = Request::from_parts(parts, Body::from(body));
            let response = next.run(request).await;

            let mut response =
                handle_response(&uri_path, &request_method, request_query.as_deref(), response).await?;

            trace_to_headers(response.headers_mut());

            Ok(response)
        }
        .instrument(span)
        .await
    }
}

async fn handle_response(
    uri_path: &str,
    request_method: &Method,
    request_query: Option<&str>,
    response: Response,
) -> Result<Response, StatusCode> {
    let (parts, body) = response.into_parts();

    let response_status = parts.status;

    let response = if response_status.is_client_error() || response_status.is_server_error() {
        let response_body = body_to_string(body).await?;

        if response_status.is_client_error() {
            warn!(
                uri_path,
                ?request_method,
                ?request_query,
                ?response_status,
                ?response_body,
                "Error processing request"
            );
        } else {
            error!(
                uri_path,
                ?request_method,
                ?request_query,
                ?response_status,
                ?response_body,
                "Error processing request"
            );
        }

        Response::from_parts(parts, Body::from(response_body))
    } else {
        Response::from_parts(parts, body)
    };

    info!(uri_path, ?request_method, ?request_query, ?response_status, "Finished processing request");

    Ok(response)
}

async fn body_to_string(body: Body) -> Result<String, StatusCode> {
    let bytes = to_bytes(body, MAX_REQUEST_BODY_SIZE).await.map_err(|error| {
        error!("Error reading body: {}", error);
        StatusCode::PAYLOAD_TOO_LARGE
    })?;

    String::from_utf8(bytes.to_vec()).map_err(|error| {
        error!("Error converting body to string: {}", error);
        StatusCode::BAD_REQUEST
    })
}
