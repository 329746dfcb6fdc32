pub mod capture;
pub mod catalog;
pub mod engine;
pub mod gestures;
pub mod hierarchy;
pub mod similarity;
pub mod typing;
pub mod xpath;
