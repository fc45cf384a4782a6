//! Request extractors.

mod caller;
pub use caller::{Caller, CLAIMS_HEADER, ROLE_HEADER};
