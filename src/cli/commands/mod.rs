pub mod staging;
pub mod token;
