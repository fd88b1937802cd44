pub mod check_boundaries;
pub mod pipeline;
pub mod registry_helper;
pub mod run;
pub mod stages;
