pub mod neighborhood;

pub use neighborhood::LaunchGrid;
