//! HTTP server layer for the account API.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │            /v1/signup   /v1/login   /v1/me                      │
//! │                                                                 │
//! │  ┌────────────┐  ┌──────────┐  ┌──────────┐  ┌──────────────┐   │
//! │  │ middleware │  │   auth   │  │ handlers │  │    routes    │   │
//! │  │ (pipeline) │  │(B/Bearer)│  │(requests)│  │(composition) │   │
//! │  └────────────┘  └──────────┘  └──────────┘  └──────────────┘   │
//! │                        context (typed extensions)               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod context;
pub mod handlers;
pub mod middleware;
pub mod routes;

pub use auth::{basic_auth, bearer_auth, AuthError};
pub use context::{CancelReason, Cancellation, ClientIp, Deadline, Principal, RequestContext};
pub use handlers::{
    get_me_handler, signin_handler, signup_handler, update_me_handler, AppState, ErrorResponse,
    SignupRequest, SignupResponse, TokenResponse, UpdateMeRequest, UserResponse,
};
pub use middleware::DATABASE_UNAVAILABLE_MESSAGE;
pub use routes::create_router;
