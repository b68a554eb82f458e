pub mod assignment;
pub mod courier;
