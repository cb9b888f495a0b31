pub mod pipeline;
pub mod supervisor;
mod worker;
