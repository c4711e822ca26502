pub mod application;
pub mod booklet;
pub mod offer;
pub mod question;
