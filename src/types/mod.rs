pub mod finding;
pub mod fix;
pub mod package;
pub mod report;

pub use finding::Finding;
pub use fix::{CandidateFix, FixStatus, VerificationVerdict};
pub use package::{PackageRef, QueryPlan};
pub use report::{ErrorReport, FixReport};
