pub mod config;
pub mod util;
pub mod val;

// Heap objects and the string interner
pub mod intern;
pub mod obj;

// Incremental collector, paced by allocation debt
pub mod gc;

pub mod chunk;
pub mod state;

pub use config::RuntimeConfig;
pub use obj::GcRef;
pub use state::{Runtime, RuntimeError, ThreadRef};
pub use val::{Function, Number, StrRef, Value};
