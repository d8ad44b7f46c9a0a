//! Decision response interpretation
//!
//! A single branch on the decision status picks one terminal outcome:
//!
//! | decision status | reply |
//! |---|---|
//! | 200 | 200, decision headers merged (first write wins), empty body |
//! | 401 | 307 to the configured redirect URL |
//! | other | same status, decision body verbatim, no headers |
//!
//! Failures before or while reading the decision response end in
//! [`Decision::Failed`].

use crate::forwarder::DecisionResponse;
use forwarder_core::headers::merge_first_write_wins;
use forwarder_core::ForwarderError;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderValue, LOCATION};
use hyper::{Response, StatusCode};

/// Outcome of one decision request
#[derive(Debug)]
pub enum Decision {
    /// Decision service returned 200
    Allow { headers: HeaderMap },
    /// Decision service returned 401
    Redirect { location: String },
    /// Any other decision status, relayed as-is
    Passthrough { status: StatusCode, body: Bytes },
    /// Request construction, transport or body read failure
    Failed { error: ForwarderError },
}

impl Decision {
    pub fn failed(error: ForwarderError) -> Self {
        Decision::Failed { error }
    }

    /// Short label for logs
    pub fn outcome(&self) -> &'static str {
        match self {
            Decision::Allow { .. } => "allow",
            Decision::Redirect { .. } => "redirect",
            Decision::Passthrough { .. } => "passthrough",
            Decision::Failed { .. } => "failed",
        }
    }

    /// Shape the reply to the original caller.
    ///
    /// `reply_headers` holds whatever the pipeline already set on the reply;
    /// on allow, decision headers never overwrite those.
    pub fn into_response(self, mut reply_headers: HeaderMap) -> Response<Full<Bytes>> {
        let (status, body) = match self {
            Decision::Allow { headers } => {
                merge_first_write_wins(&headers, &mut reply_headers);
                (StatusCode::OK, Bytes::new())
            }
            Decision::Redirect { location } => match HeaderValue::from_str(&location) {
                Ok(value) => {
                    reply_headers.insert(LOCATION, value);
                    (StatusCode::TEMPORARY_REDIRECT, Bytes::new())
                }
                Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, Bytes::new()),
            },
            Decision::Passthrough { status, body } => (status, body),
            Decision::Failed { error } => (error.status_code(), Bytes::new()),
        };

        let mut response = Response::new(Full::new(body));
        *response.status_mut() = status;
        *response.headers_mut() = reply_headers;
        response
    }
}

/// Map a decision response to its outcome
pub fn interpret(response: DecisionResponse, redirect_url: &str) -> Decision {
    let DecisionResponse { status, headers, body } = response;

    if status == StatusCode::OK {
        return Decision::Allow { headers };
    }

    // The body is always drained; a failed read is a failure even on 401
    let body = match body {
        Ok(body) => body,
        Err(error) => return Decision::failed(error),
    };

    if status == StatusCode::UNAUTHORIZED {
        return Decision::Redirect {
            location: redirect_url.to_string(),
        };
    }

    Decision::Passthrough { status, body }
}
