//! Runtime object types shared by handle: generators and context managers.
pub mod generator;
pub mod manager;

pub use generator::{GeneratorRef, GeneratorState, GeneratorStep};
pub(crate) use generator::Generator;
pub use manager::{Callable, ManagerRef};
