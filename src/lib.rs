pub mod error;
pub mod functions;
pub mod gradcheck;
pub mod io;
pub mod layers;
pub mod math;
pub mod model;
pub mod optimizer;
pub mod train;
pub mod trainer;
pub mod types;
pub mod util;
