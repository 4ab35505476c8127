pub mod error;
pub mod fakes;
pub mod model;
pub mod poll;
pub mod state;
pub mod store;
pub mod validate;
pub mod version_status;
pub mod workflow;

pub use error::{OptHubError, Result};
pub use poll::{CancelToken, PollConfig};
pub use state::TrialState;
pub use store::TrialStore;
pub use workflow::{MatchHandle, OptHub, TrialHandle, WorkflowConfig};
