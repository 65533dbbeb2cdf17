mod aggregator;
mod mean;

pub use aggregator::Aggregator;
pub use mean::Mean;
