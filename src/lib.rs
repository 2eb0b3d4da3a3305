use std::{net, time::Duration};

pub mod area;
pub mod cli;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod fib;
pub mod interface;
pub mod lsa;
pub mod neighbor;
pub mod packet;
pub mod rde;
pub mod rtable;
pub mod util;

pub const OPTION_E: u8 = 0x02;

pub const ALL_SPF_ROUTERS: net::Ipv4Addr = net::Ipv4Addr::new(224, 0, 0, 5);
pub const ALL_D_ROUTERS: net::Ipv4Addr = net::Ipv4Addr::new(224, 0, 0, 6);

pub const OSPF_IP_PROTOCOL: u8 = 89;
pub const OSPF_VERSION: u8 = 2;

pub const IPV4_PACKET_MTU: usize = 1500;

/// delayed acknowledgements are flushed this often
pub const ACK_DELAY: Duration = Duration::from_secs(1);
