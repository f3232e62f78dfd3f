pub mod errors;
pub mod prior;
pub mod model;
pub mod samples;
pub mod result;
pub mod analysis;

pub use errors::*;
pub use prior::*;
pub use model::*;
pub use samples::*;
pub use result::*;
pub use analysis::*;
