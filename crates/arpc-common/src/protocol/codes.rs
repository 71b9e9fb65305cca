//! Built-in error codes surfaced to clients in the `code` field of an
//! [`ErrorEnvelope`](super::ErrorEnvelope).

// Request parsing
/// The query string or percent-encoded argument is malformed
pub const INVALID_URL: &str = "INVALID_URL";
/// The `route` query parameter is missing
pub const MISSING_ROUTE: &str = "MISSING_ROUTE";
/// The `version` query parameter is missing
pub const MISSING_VERSION: &str = "MISSING_VERSION";
/// No route tree is registered for the requested version
pub const VERSION_NOT_FOUND: &str = "VERSION_NOT_FOUND";
/// An argument is required but none was sent
pub const MISSING_ARG: &str = "MISSING_ARG";
/// The argument could not be decoded or failed input validation
pub const INVALID_ARG: &str = "INVALID_ARG";
/// The request body exceeds the configured limit
pub const REQUEST_TOO_LARGE: &str = "REQUEST_TOO_LARGE";
/// The route does not resolve to a handler
pub const ROUTE_NOT_FOUND: &str = "ROUTE_NOT_FOUND";

// Authentication
/// The `Authorization` header has a type but no token
pub const MISSING_TOKEN: &str = "MISSING_TOKEN";
/// The `Authorization` header names an unknown token type
pub const BAD_TOKEN_TYPE: &str = "BAD_TOKEN_TYPE";
/// The auth handler rejected the token
pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
/// The route requires a user and none was authenticated
pub const UNAUTHENTICATED: &str = "UNAUTHENTICATED";

// Everything else
/// The rate limiter rejected the call
pub const RATELIMITED: &str = "RATELIMITED";
/// An unhandled server-side failure
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

// Atomic program validation
pub const INVALID_ARRAY: &str = "INVALID_ARRAY";
pub const INVALID_ITEM: &str = "INVALID_ITEM";
pub const INVALID_ROUTE: &str = "INVALID_ROUTE";
pub const INVALID_VARIABLE: &str = "INVALID_VARIABLE";
pub const INVALID_ASSIGNMENT: &str = "INVALID_ASSIGNMENT";
pub const INVALID_PLUCK: &str = "INVALID_PLUCK";
pub const INVALID_OPERATION: &str = "INVALID_OPERATION";
pub const INVALID_MATHS_OPERATION: &str = "INVALID_MATHS_OPERATION";
pub const INVALID_SET_OPERATION: &str = "INVALID_SET_OPERATION";
