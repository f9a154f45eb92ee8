mod token_store_file;
mod token_store_memory;

pub use token_store_file::*;
pub use token_store_memory::*;
