// Technical indicators module
// Bollinger bands over closing prices, computed incrementally

pub mod bollinger;

pub use bollinger::{calculate_bollinger, calculate_bollinger_series, Band};
