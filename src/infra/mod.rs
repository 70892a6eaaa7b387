pub mod memory;
pub mod push;
pub mod store;
