mod deadline;

pub use deadline::{Interval, Timeout};
