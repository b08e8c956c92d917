pub mod metrics;
pub mod presence;
pub mod publish;
pub mod reconcile;
