//! Issuance workflow module

pub mod services;
pub mod session;
pub mod state;
pub mod traits;

pub use services::IssuanceServices;
pub use session::IssuanceSession;
pub use state::{IssuanceEvent, IssuanceState};
pub use traits::IssuanceSteps;
