mod memory;

pub use memory::InMemoryKv;
