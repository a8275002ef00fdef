pub mod collection;
pub mod filter;
pub mod point;
pub mod requests;
