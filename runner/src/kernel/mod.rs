pub mod control_plane;
pub mod jobs;
pub mod traits;

pub use control_plane::ControlPlaneClient;
pub use traits::{DescriptionCustomizer, FormFieldMapper, SubmissionDriver, SubmissionOutcome, SuccessProbabilityOracle};
