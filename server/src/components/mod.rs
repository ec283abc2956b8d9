pub mod layout;
pub mod tweet;
