pub mod builder;
pub mod files;
pub mod review;

pub use builder::{
    build_directory_plan, build_file_plan, plan_header, Plan, PlanLevel, PlanOptions,
    PlannedGroup, PlannedMember, Role,
};
pub use files::{latest_plan, plan_stem, read_plan, write_csv_export, write_plan, PlanArtifacts, PlanFile};
pub use review::{review, ReviewCursor, ReviewOptions, ReviewOutcome, ReviewSummary};
