//! Core domain models: jobs and their dependency graph, orbits, granules.

pub mod dag;
pub mod granule;
pub mod job;
pub mod orbit;

pub use dag::{Dependency, DependencyKind, JobGraph};
pub use granule::{Granule, GranuleState, WorkPaths};
pub use job::{Job, JobId, Payload};
pub use orbit::{orbit_year, output_file_name, OrbitRange, OrbitTimes};
