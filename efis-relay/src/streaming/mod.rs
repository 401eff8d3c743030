//! UDP output to display units

pub mod udp_fanout;

pub use udp_fanout::UdpFanout;
