//! Login flow, session credential handling and session persistence.
//!
//! [`Authenticator`] performs the browser-emulating OAuth login and returns a
//! [`SessionCredential`]; [`SessionStore`] holds the credential the API client
//! sends; [`store_session`] and friends keep it encrypted on disk.

mod authenticator;
mod error;
mod form;
mod location;
mod redirect;
mod session;
mod storage;
mod transport;

pub use authenticator::{
    AuthEndpoints, Authenticator, DEFAULT_APP_HOST, DEFAULT_IDENTITY_ORIGIN, DEFAULT_LOGIN_URL,
    DEFAULT_SESSION_CHECK_URL, RedirectBounds,
};
pub use error::{AuthError, LoginStage, TransportError};
pub use form::{FormExtraction, extract_form};
pub use location::{IdentityOrigin, normalize_location};
pub use session::{SessionCredential, SessionStore, SessionValidity, cookie_fragment};
pub use storage::{
    MASTER_KEY_ENV, StorageError, StoredSession, clear_session, config_dir, load_session,
    session_path, store_session,
};
pub use transport::{
    CONNECT_TIMEOUT_SECS, HttpMethod, HttpRequest, HttpResponse, REQUEST_TIMEOUT_SECS,
    ReqwestTransport, Transport, TransportTimeouts, encode_form,
};

pub(crate) use form::compile_static_regex;
pub(crate) use transport::apply_env_proxy_fallback;
