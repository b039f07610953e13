pub mod pull;
pub mod run;
