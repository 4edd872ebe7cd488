mod challenge;
mod credentials;
mod dispatch;
mod interceptor;

pub use challenge::{
    authorization_header, compute_response, generate_cnonce, is_digest_challenge, md5_hex,
    parse_auth_params, request_path, resolve_url, DigestChallenge, DigestChallengeError,
    DEFAULT_ALGORITHM, DEFAULT_BASE_URL, NONCE_COUNT, QOP_AUTH,
};
pub use credentials::DigestCredentials;
pub use dispatch::{
    DispatchError, HttpDispatch, OutboundRequest, OutboundResponse, ReqwestDispatch,
};
pub use interceptor::{DigestInterceptor, DigestState};
