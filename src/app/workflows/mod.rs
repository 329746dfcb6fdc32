pub mod audio;
pub mod caption;
pub mod login;
pub mod post_reel;
pub mod steps;
