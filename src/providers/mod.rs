pub mod directions;

pub use directions::{DirectionsClient, DirectionsError, RouteProvider, TripQuery};
