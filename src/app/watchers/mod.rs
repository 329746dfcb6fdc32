pub mod rules;
pub mod supervisor;
