pub mod scope;
pub mod walk;

pub use scope::detect_scope;
pub use walk::expand_intake;
