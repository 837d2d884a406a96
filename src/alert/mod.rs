//! Maps drift reports to an alert severity.

mod policy;

pub use policy::{AlertAssessment, AlertPolicy, AlertTrigger, Severity};
