use crate::{Authenticated, StepResult, to_negotiate_header, unauthorized};
use axum_core::response::IntoResponse;
use http::{
    HeaderMap, HeaderValue, StatusCode,
    header::{CONNECTION, WWW_AUTHENTICATE},
};

use crate::{
    controller::NegotiationOutcome,
    error::{AuthenticationError, NegotiationFailure},
};

pub(crate) fn handle(outcome: NegotiationOutcome) -> StepResult {
    match outcome {
        NegotiationOutcome::Established { identity, mutual_token } => {
            let mutual = mutual_token.map(|token| to_negotiate_header(&token));
            StepResult::Finished(Authenticated(identity), mutual)
        }
        NegotiationOutcome::ContinueWith(challenge) => {
            let mut header_map = HeaderMap::new();
            header_map.insert(WWW_AUTHENTICATE, to_negotiate_header(&challenge));
            header_map.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
            let response = (StatusCode::UNAUTHORIZED, header_map, "").into_response();
            StepResult::ContinueWith(response)
        }
        NegotiationOutcome::Failed(AuthenticationError::Negotiation(NegotiationFailure::InvalidEncoding(_))) => {
            StepResult::Error(StatusCode::BAD_REQUEST.into_response())
        }
        NegotiationOutcome::Failed(_) => StepResult::Error(unauthorized("authorization failed")),
    }
}
