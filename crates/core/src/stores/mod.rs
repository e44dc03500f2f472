pub mod file;
pub mod memory;

pub use file::FileIndexStore;
pub use memory::MemoryIndexStore;
