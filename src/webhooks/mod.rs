// Webhooks - signed outbound delivery pipeline
//
// deliver() performs one attempt: active check, fixed-window rate limit,
// HMAC signing, HTTP send, delivery record, endpoint bookkeeping.
// deliver_with_retry() wraps it in the caller-side bounded retry loop.

pub mod delivery;
pub mod endpoint;
pub mod rate_limit;
pub mod signing;

pub use delivery::{DeliveryOutcome, WebhookDeliveryService};
pub use endpoint::{DeliveryStatus, SignatureAlgorithm, WebhookDeliveryRecord, WebhookEndpoint};
pub use rate_limit::RateLimiter;
pub use signing::{sign_bytes, sign_payload};
