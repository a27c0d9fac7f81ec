mod errors;
mod service;
mod source;
#[cfg(test)]
mod tests;

pub use errors::ImportError;
pub use service::{ImportService, ImportSummary};
