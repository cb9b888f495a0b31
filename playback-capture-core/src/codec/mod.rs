pub mod opus;
pub mod software;
