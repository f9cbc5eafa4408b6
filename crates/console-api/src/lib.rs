//! Authenticated request pipeline for the console backend
//!
//! Every API call goes through `RequestPipeline::execute`, which:
//! - attaches `Authorization: Bearer <access>` from the credential store
//! - unwraps the `{code, message, data}` envelope into `data` or a failure
//! - on 401, renews the session once (shared by all concurrent callers) and
//!   replays the call exactly once
//!
//! Renewal failure is not reported to the callers waiting on it. It clears
//! the credential store and asks the `Navigator` to show the sign-in entry
//! point; each caller then sees whatever its unauthenticated replay returns.

pub mod envelope;
pub mod error;
pub mod metrics;
pub mod navigator;
pub mod pipeline;
pub mod request;

pub use envelope::{Envelope, unwrap_envelope};
pub use error::{Error, Result};
pub use navigator::{LogNavigator, Navigator};
pub use pipeline::{PipelineConfig, RenewalOutcome, RequestPipeline};
pub use request::{ApiRequest, Attempt};
