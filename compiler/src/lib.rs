//! WG Compiler and Policy Compiler (spec §4.3/§4.4): the two deterministic
//! artifact generators driven from the Graph Resolver's projections, plus
//! DNS record compilation for jump peers (spec §4.6/§4.7).

pub mod dns;
pub mod policy;
pub mod wg;
