// Domain layer: core models and ports. Adapters live under backend/ and utils/monitor.

pub mod model;
pub mod ports;
