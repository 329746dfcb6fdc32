pub mod caption_gen;
pub mod drive;
pub mod email_activator;
pub mod identity;
pub mod imap_code;
pub mod prompt;
pub mod record_store;
pub mod sqlite_store;
pub mod vpn;
