pub mod fingerprint;

pub use fingerprint::{fingerprint, read_preview};
