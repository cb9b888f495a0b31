pub mod archive;
pub mod metadata;
pub mod mp4_container;
pub mod muxer;
