mod cascade_policy;

pub use cascade_policy::CascadePolicy;
