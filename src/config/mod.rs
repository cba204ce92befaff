pub mod scenario;
pub mod service;

pub use scenario::ScenarioParams;
pub use service::ServiceConfig;
