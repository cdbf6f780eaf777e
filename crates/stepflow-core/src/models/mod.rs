pub mod criteria;
pub mod step;
pub mod workflow;

pub use criteria::*;
pub use step::*;
pub use workflow::*;
