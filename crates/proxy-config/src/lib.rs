mod route;

pub use route::{Route, RouteLoadError, RouteTable};
