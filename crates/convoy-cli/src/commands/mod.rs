pub mod rehearse;
pub mod validate;
