pub mod extraction;
pub mod fields;
pub mod risk;
