pub mod errors;
pub mod parameters;

pub use errors::*;
pub use parameters::*;
