pub mod tick_meter;

pub use tick_meter::RateMeter;
