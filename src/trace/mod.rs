pub mod parser;
pub mod scheduler;

pub use parser::*;
pub use scheduler::*;
