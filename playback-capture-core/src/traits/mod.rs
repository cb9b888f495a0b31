pub mod container_sink;
pub mod encoder;
pub mod pipeline_delegate;
pub mod sample_source;
pub mod session_collaborators;
