pub mod intent;
pub mod packages;
pub mod types;

pub use intent::PullRequestIntent;
pub use types::{ChangeKind, FileChange, PrState, PullRequestData};
