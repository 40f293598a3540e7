pub mod identifiers;
pub mod owner;
