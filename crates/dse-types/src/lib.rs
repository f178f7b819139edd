pub mod errors;
pub mod job;
pub mod result;
pub mod value;

pub use errors::*;
pub use job::*;
pub use result::*;
pub use value::*;
