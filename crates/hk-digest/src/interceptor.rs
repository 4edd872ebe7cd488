use std::fmt;

use async_trait::async_trait;

use crate::challenge::{
    authorization_header, generate_cnonce, is_digest_challenge, request_path, DigestChallenge,
    DigestChallengeError,
};
use crate::credentials::DigestCredentials;
use crate::dispatch::{DispatchError, HttpDispatch, OutboundRequest, OutboundResponse};

type Outcome = Result<OutboundResponse, DispatchError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestState {
    Sent,
    Challenged,
    Retried,
    Done,
}

impl fmt::Display for DigestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sent => "sent",
            Self::Challenged => "challenged",
            Self::Retried => "retried",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Answers one `401 Digest` challenge per request by reissuing it with an
/// `Authorization` header. Credentials travel on the request itself
/// ([`OutboundRequest::digest`]); requests without usable credentials pass
/// straight through.
pub struct DigestInterceptor<D> {
    inner: D,
}

impl<D: HttpDispatch> DigestInterceptor<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn transition(&self, request: &OutboundRequest, from: DigestState, to: DigestState) {
        tracing::debug!(method = %request.method, url = %request.url, %from, %to, "digest transition");
    }

    /// The challenge header, when the outcome qualifies for a retry.
    fn challenge_header(request: &OutboundRequest, outcome: &Outcome) -> Option<String> {
        if request.retried || request.has_authorization() {
            return None;
        }
        let response = match outcome {
            Ok(response) => response,
            Err(error) => error.response()?,
        };
        if response.status != 401 {
            return None;
        }
        response
            .header("www-authenticate")
            .filter(|header| is_digest_challenge(header))
            .map(str::to_string)
    }

    pub async fn execute(&self, mut request: OutboundRequest) -> Outcome {
        let credentials = match request.digest.take() {
            Some(credentials) if credentials.is_usable() => credentials,
            _ => return self.inner.dispatch(request).await,
        };

        let outcome = self.inner.dispatch(request.clone()).await;
        let Some(header) = Self::challenge_header(&request, &outcome) else {
            self.transition(&request, DigestState::Sent, DigestState::Done);
            return outcome;
        };
        self.transition(&request, DigestState::Sent, DigestState::Challenged);

        let authorization = match self.authorize(&request, &credentials, &header) {
            Ok(authorization) => authorization,
            Err(error) => {
                tracing::info!(url = %request.url, error = %error, "digest challenge not answered");
                self.transition(&request, DigestState::Challenged, DigestState::Done);
                return outcome;
            }
        };

        request.headers.insert("Authorization".to_string(), authorization);
        request.retried = true;
        self.transition(&request, DigestState::Challenged, DigestState::Retried);
        let retried = self.inner.dispatch(request.clone()).await;
        self.transition(&request, DigestState::Retried, DigestState::Done);
        retried
    }

    fn authorize(
        &self,
        request: &OutboundRequest,
        credentials: &DigestCredentials,
        header: &str,
    ) -> Result<String, DigestChallengeError> {
        let challenge = DigestChallenge::parse(header)?;
        let uri = request_path(&request.url, request.base_url.as_deref())?;
        let cnonce = generate_cnonce();
        Ok(authorization_header(
            credentials,
            &challenge,
            &request.method,
            &uri,
            &cnonce,
        ))
    }
}

#[async_trait]
impl<D: HttpDispatch> HttpDispatch for DigestInterceptor<D> {
    async fn dispatch(&self, request: OutboundRequest) -> Outcome {
        self.execute(request).await
    }
}
