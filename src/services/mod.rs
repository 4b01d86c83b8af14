pub mod assembler;
pub mod chunk_writer;
pub mod error;
pub mod finalizer;
pub mod integrity;
pub mod reaper;
pub mod upload_service;
pub mod worker;
