pub mod manager;
pub mod risk;
pub mod validation;

pub use manager::{Collaborators, MultichainManager};
pub use risk::calculate_risk_metrics;
pub use validation::validate_transfer_request;
