pub mod agtype;
pub mod db;
pub mod engine;
pub mod export;
pub mod normalize;
