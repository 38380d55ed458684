pub mod compare;
pub mod config;
pub mod diff;
pub mod logging;
pub mod manager;
pub mod normalize;
pub mod search;
pub mod series;
pub mod source;
