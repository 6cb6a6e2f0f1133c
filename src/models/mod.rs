pub mod geo;
pub mod route;
pub mod trip;
