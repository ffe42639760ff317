pub mod form;
pub mod jwk;
pub mod jwt;
pub mod secret;
